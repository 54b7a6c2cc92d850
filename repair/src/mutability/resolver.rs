//! Resolution of a method's receiver mode.
//!
//! There is no type checker here. Receiver types are resolved from what the
//! source spells out (parameter and `let` annotations, constructor paths,
//! struct field declarations) and methods are looked up in the impls and
//! traits of the same file, then in a table of standard library methods.

use std::collections::HashMap;

use syn::FnArg;
use syn::ImplItem;
use syn::Item;
use syn::Signature;
use syn::TraitItem;

use crate::syntax::type_name;

/// How a method takes its receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverKind {
    /// `self`, `mut self`, `self: Box<Self>`
    Value,
    /// `&self`
    SharedRef,
    /// `&mut self`
    MutRef,
}

impl ReceiverKind {
    /// Receiver mode of a signature, `None` for associated functions
    pub fn of(sig: &Signature) -> Option<Self> {
        match sig.inputs.first()? {
            FnArg::Receiver(receiver) => Some(match &receiver.reference {
                Some(_) if receiver.mutability.is_some() => Self::MutRef,
                Some(_) => Self::SharedRef,
                None => Self::Value,
            }),
            FnArg::Typed(_) => None,
        }
    }
}

/// Answers "how does `method` on a value of type `receiver_type` take `self`?"
pub trait ReceiverResolver {
    /// `receiver_type` is the last path segment of the receiver's type when
    /// it could be determined
    fn receiver_kind(&self, receiver_type: Option<&str>, method: &str) -> Option<ReceiverKind>;

    /// Declared type name of `field` on struct `owner`
    fn field_type(&self, owner: &str, field: &str) -> Option<String>;
}

/// Standard library methods that take `&mut self`.
///
/// Names that are `&mut self` on one common type and by-value on another
/// (`take`, `map`) are left out.
const STD_MUT_SELF_METHODS: &[&str] = &[
    "append",
    "as_mut",
    "as_mut_slice",
    "clear",
    "dedup",
    "dedup_by",
    "dedup_by_key",
    "drain",
    "entry",
    "extend",
    "extend_from_slice",
    "fill",
    "first_mut",
    "flush",
    "get_mut",
    "get_or_insert",
    "get_or_insert_with",
    "insert",
    "insert_str",
    "iter_mut",
    "last_mut",
    "next",
    "next_back",
    "pop",
    "pop_back",
    "pop_front",
    "push",
    "push_back",
    "push_front",
    "push_str",
    "read",
    "read_line",
    "read_to_end",
    "read_to_string",
    "remove",
    "replace_range",
    "reserve",
    "resize",
    "retain",
    "reverse",
    "rotate_left",
    "rotate_right",
    "set_len",
    "shrink_to_fit",
    "sort",
    "sort_by",
    "sort_by_key",
    "sort_unstable",
    "sort_unstable_by",
    "sort_unstable_by_key",
    "split_off",
    "swap",
    "swap_remove",
    "truncate",
    "values_mut",
    "write",
    "write_all",
    "write_fmt",
    "write_str",
];

/// Standard library types whose same-named method takes `&self` through
/// interior mutability
const STD_SHARED_SELF_METHODS: &[(&str, &str)] = &[
    ("Cell", "swap"),
    ("RefCell", "swap"),
    ("RwLock", "read"),
    ("RwLock", "write"),
];

/// Methods, trait methods and struct fields declared in one file
#[derive(Debug, Default)]
pub struct SourceIndex {
    /// (type or trait name, method) -> receiver mode
    methods: HashMap<(String, String), ReceiverKind>,
    /// method -> receiver modes of every local declaration with that name
    by_name: HashMap<String, Vec<ReceiverKind>>,
    /// (struct name, field) -> field type name
    fields:  HashMap<(String, String), String>,
}

impl SourceIndex {
    pub fn build(file: &syn::File) -> Self {
        let mut index = Self::default();
        index.add_items(&file.items);
        tracing::trace!(
            "Indexed {} methods and {} fields",
            index.methods.len(),
            index.fields.len()
        );
        index
    }

    fn add_items(&mut self, items: &[Item]) {
        for item in items {
            match item {
                Item::Impl(block) => {
                    let Some(owner) = type_name(&block.self_ty) else {
                        continue;
                    };
                    for impl_item in &block.items {
                        if let ImplItem::Fn(method) = impl_item {
                            self.add_method(&owner, &method.sig);
                        }
                    }
                }
                Item::Trait(definition) => {
                    let owner = definition.ident.to_string();
                    for trait_item in &definition.items {
                        if let TraitItem::Fn(method) = trait_item {
                            self.add_method(&owner, &method.sig);
                        }
                    }
                }
                Item::Struct(structure) => {
                    let owner = structure.ident.to_string();
                    for field in &structure.fields {
                        let (Some(ident), Some(ty)) = (&field.ident, type_name(&field.ty)) else {
                            continue;
                        };
                        self.fields.insert((owner.clone(), ident.to_string()), ty);
                    }
                }
                Item::Mod(module) => {
                    if let Some((_, items)) = &module.content {
                        self.add_items(items);
                    }
                }
                _ => {}
            }
        }
    }

    fn add_method(&mut self, owner: &str, sig: &Signature) {
        let Some(kind) = ReceiverKind::of(sig) else {
            return;
        };
        let name = sig.ident.to_string();
        self.by_name.entry(name.clone()).or_default().push(kind);
        self.methods.insert((owner.to_string(), name), kind);
    }

    fn owns_type(&self, type_name: &str) -> bool {
        self.methods.keys().any(|(owner, _)| owner == type_name)
            || self.fields.keys().any(|(owner, _)| owner == type_name)
    }

    /// Receiver mode shared by every local declaration of `method`
    fn unanimous(&self, method: &str) -> Option<ReceiverKind> {
        let kinds = self.by_name.get(method)?;
        let first = *kinds.first()?;
        kinds.iter().all(|kind| *kind == first).then_some(first)
    }
}

/// `swap` on any `Atomic*` type, or an entry of the shared-receiver table
fn std_shared(receiver_type: &str, method: &str) -> bool {
    (receiver_type.starts_with("Atomic") && method == "swap")
        || STD_SHARED_SELF_METHODS.contains(&(receiver_type, method))
}

fn std_kind(method: &str) -> Option<ReceiverKind> {
    STD_MUT_SELF_METHODS
        .binary_search(&method)
        .ok()
        .map(|_| ReceiverKind::MutRef)
}

impl ReceiverResolver for SourceIndex {
    fn receiver_kind(&self, receiver_type: Option<&str>, method: &str) -> Option<ReceiverKind> {
        match receiver_type {
            Some(ty) => {
                if let Some(kind) = self.methods.get(&(ty.to_string(), method.to_string())) {
                    return Some(*kind);
                }
                if self.owns_type(ty) {
                    // A local type calling a method it does not declare goes
                    // through a trait impl elsewhere in the file
                    return self.unanimous(method).or_else(|| std_kind(method));
                }
                if std_shared(ty, method) {
                    return Some(ReceiverKind::SharedRef);
                }
                std_kind(method)
            }
            None => self.unanimous(method).or_else(|| std_kind(method)),
        }
    }

    fn field_type(&self, owner: &str, field: &str) -> Option<String> {
        self.fields
            .get(&(owner.to_string(), field.to_string()))
            .cloned()
    }
}
