//! The port type system: annotations as written on a task signature, the
//! resolved [`Type`] objects the compiler reasons about, and the castability
//! relation [`TypeCheck`][crate::pass::typecheck::TypeCheck] consults.

use std::fmt;

/// A type annotation as it appears on a task parameter or return value,
/// before the registry resolves it into a concrete [`Type`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeAnnotation {
    Int,
    Str,
    Bool,
    Dict,
    Float,
    /// A file-backed type, named by its extension/format id (`"csv"`,
    /// `"xls"`, `"png"`, or any user-registered format string).
    File(String),
    /// `any`: unifies with every built-in scalar type.
    Any,
    /// `anyfile`: unifies with every file type.
    AnyFile,
    /// `@argsN.field`: resolved at task-construction time by reading
    /// `field` off the `N`th positional argument's runtime value. `n` is
    /// zero-based here even though the surface syntax (`@args1.field`) is
    /// one-based, matching Python's convention of skipping `self`.
    Dependent { arg_index: usize, field: String },
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeAnnotation::Int => write!(f, "int"),
            TypeAnnotation::Str => write!(f, "str"),
            TypeAnnotation::Bool => write!(f, "bool"),
            TypeAnnotation::Dict => write!(f, "dict"),
            TypeAnnotation::Float => write!(f, "float"),
            TypeAnnotation::File(ext) => write!(f, "{ext}"),
            TypeAnnotation::Any => write!(f, "any"),
            TypeAnnotation::AnyFile => write!(f, "anyfile"),
            TypeAnnotation::Dependent { arg_index, field } => {
                write!(f, "@args{}.{}", arg_index + 1, field)
            }
        }
    }
}

/// The broad category a resolved [`Type`] falls into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetaType {
    BuiltIn,
    File,
    /// A user-registered type id that the registry has not seen the
    /// built-in or file form of; treated the same as the dynamic `any`
    /// family for castability purposes.
    UserDef,
    /// The dynamic unification types `any`/`anyfile`.
    Dynamic,
}

/// A resolved port type. Two types are equal iff their ids match; the
/// `meta`/`ext` fields are metadata carried for diagnostics and for the
/// castability table.
#[derive(Clone, Debug)]
pub struct Type {
    pub id: String,
    pub meta: MetaType,
}

impl Type {
    pub fn builtin(id: impl Into<String>) -> Self {
        Type {
            id: id.into(),
            meta: MetaType::BuiltIn,
        }
    }

    pub fn file(id: impl Into<String>) -> Self {
        Type {
            id: id.into(),
            meta: MetaType::File,
        }
    }

    pub fn dynamic(id: impl Into<String>) -> Self {
        Type {
            id: id.into(),
            meta: MetaType::Dynamic,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.meta, MetaType::File)
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Type {}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Resolves a surface annotation into its runtime [`Type`].
///
/// Unrecognized file extensions are still accepted as file types (the
/// registry is open: any string can name a file format); an unresolvable
/// dependent annotation (caller passes a literal value instead of letting
/// [`crate::recorder`] resolve it first) degrades to the dynamic `any` type
/// rather than failing, matching the "never fails" guarantee of the
/// original type registry.
pub fn get_type(ann: &TypeAnnotation) -> Type {
    match ann {
        TypeAnnotation::Int => Type::builtin("int"),
        TypeAnnotation::Str => Type::builtin("str"),
        TypeAnnotation::Bool => Type::builtin("bool"),
        TypeAnnotation::Dict => Type::builtin("dict"),
        TypeAnnotation::Float => Type::builtin("float"),
        TypeAnnotation::File(ext) => Type::file(ext.clone()),
        TypeAnnotation::Any => Type::dynamic("any"),
        TypeAnnotation::AnyFile => Type::dynamic("anyfile"),
        TypeAnnotation::Dependent { .. } => Type::dynamic("any"),
    }
}

/// True if a value typed `from` may flow into a port typed `to`.
///
/// The relation is reflexive (any type is castable to itself) and
/// otherwise governed by a small, directed widening table mirroring the
/// original registry: `int -> float`, and `csv`/`xls` cross-cast to each
/// other, both with an escape hatch into the matching dynamic family
/// (`any` for built-ins, `anyfile` for files).
pub fn is_castable(from: &Type, to: &Type) -> bool {
    if from.id == to.id {
        return true;
    }
    match (from.id.as_str(), to.id.as_str()) {
        ("int", "float") | ("int", "any") => true,
        ("csv", "xls") | ("csv", "anyfile") => true,
        ("xls", "csv") | ("xls", "anyfile") => true,
        (_, "any") if matches!(from.meta, MetaType::BuiltIn) => true,
        (_, "anyfile") if matches!(from.meta, MetaType::File) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflexive_cast() {
        let t = get_type(&TypeAnnotation::Int);
        assert!(is_castable(&t, &t));
    }

    #[test]
    fn int_widens_to_float_and_any() {
        let int_t = get_type(&TypeAnnotation::Int);
        let float_t = get_type(&TypeAnnotation::Float);
        let any_t = get_type(&TypeAnnotation::Any);
        assert!(is_castable(&int_t, &float_t));
        assert!(is_castable(&int_t, &any_t));
        assert!(!is_castable(&float_t, &int_t));
    }

    #[test]
    fn csv_xls_cross_cast() {
        let csv = get_type(&TypeAnnotation::File("csv".into()));
        let xls = get_type(&TypeAnnotation::File("xls".into()));
        let anyfile = get_type(&TypeAnnotation::AnyFile);
        assert!(is_castable(&csv, &xls));
        assert!(is_castable(&xls, &csv));
        assert!(is_castable(&csv, &anyfile));
        assert!(is_castable(&xls, &anyfile));
    }

    #[test]
    fn unrelated_types_are_not_castable() {
        let str_t = get_type(&TypeAnnotation::Str);
        let csv = get_type(&TypeAnnotation::File("csv".into()));
        assert!(!is_castable(&str_t, &csv));
    }

    #[test]
    fn dependent_annotation_resolves_to_dynamic_any() {
        let t = get_type(&TypeAnnotation::Dependent {
            arg_index: 2,
            field: "id".into(),
        });
        assert_eq!(t.id, "any");
    }
}
