//! Parsed view of a source file: function lookup and span-to-text mapping.
//!
//! Spans come from `proc-macro2` with `span-locations`, which reports
//! 1-based lines and 0-based character columns. [`SourceText`] turns those
//! into byte offsets into the text that was parsed.

use std::ops::Range;

use error_stack::ResultExt;
use proc_macro2::LineColumn;
use proc_macro2::Span;
use syn::Block;
use syn::ImplItem;
use syn::ImplItemFn;
use syn::Item;
use syn::ItemFn;
use syn::Signature;
use syn::TraitItem;
use syn::TraitItemFn;
use syn::Type;
use syn::Visibility;
use syn::spanned::Spanned;

use crate::error::Error;
use crate::error::Result;

/// Parse a whole source file
pub fn parse(text: &str) -> Result<syn::File> {
    syn::parse_file(text).map_err(|e| {
        let at = e.span().start();
        error_stack::Report::new(e)
            .change_context(Error::Analysis("source does not parse".to_string()))
            .attach(format!("At line {}, column {}", at.line, at.column + 1))
    })
}

/// Source text with a line index for span lookups
#[derive(Debug, Clone)]
pub struct SourceText<'a> {
    text:        &'a str,
    line_starts: Vec<usize>,
}

impl<'a> SourceText<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(index, _)| index + 1));
        Self { text, line_starts }
    }

    /// Byte offset of a line/column position
    pub fn offset(&self, at: LineColumn) -> Option<usize> {
        let line_start = *self.line_starts.get(at.line.checked_sub(1)?)?;
        let line_end = self
            .line_starts
            .get(at.line)
            .copied()
            .unwrap_or(self.text.len());
        let line = self.text.get(line_start..line_end)?;

        match line.char_indices().nth(at.column) {
            Some((index, _)) => Some(line_start + index),
            None => (line.chars().count() == at.column).then_some(line_end),
        }
    }

    pub fn byte_range(&self, span: Span) -> Option<Range<usize>> {
        let start = self.offset(span.start())?;
        let end = self.offset(span.end())?;
        (start <= end).then_some(start..end)
    }

    /// The text a span covers
    pub fn slice(&self, span: Span) -> Option<&'a str> {
        self.text.get(self.byte_range(span)?)
    }
}

/// Last path segment of a type, looking through references and parentheses.
///
/// `&mut Vec<u8>` names `Vec`, `crate::model::Account` names `Account`.
pub fn type_name(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident.to_string()),
        Type::Reference(reference) => type_name(&reference.elem),
        Type::Paren(paren) => type_name(&paren.elem),
        Type::Group(group) => type_name(&group.elem),
        _ => None,
    }
}

/// The three places a function with a body can be declared
#[derive(Debug, Clone, Copy)]
pub enum FunctionItem<'f> {
    Free(&'f ItemFn),
    Method(&'f ImplItemFn),
    Provided(&'f TraitItemFn),
}

/// A function found in a file, with the type `Self` refers to inside it
#[derive(Debug, Clone)]
pub struct FunctionSite<'f> {
    pub item:      FunctionItem<'f>,
    pub self_type: Option<String>,
}

impl<'f> FunctionSite<'f> {
    pub const fn sig(&self) -> &'f Signature {
        match self.item {
            FunctionItem::Free(f) => &f.sig,
            FunctionItem::Method(f) => &f.sig,
            FunctionItem::Provided(f) => &f.sig,
        }
    }

    pub fn block(&self) -> Option<&'f Block> {
        match self.item {
            FunctionItem::Free(f) => Some(&f.block),
            FunctionItem::Method(f) => Some(&f.block),
            FunctionItem::Provided(f) => f.default.as_ref(),
        }
    }

    /// Byte range from the visibility (or signature) through the closing brace.
    ///
    /// Outer attributes are not part of the range.
    pub fn range(&self, source: &SourceText<'_>) -> Option<Range<usize>> {
        let start = match self.item {
            FunctionItem::Free(f) => declaration_start(&f.vis, None, &f.sig),
            FunctionItem::Method(f) => {
                declaration_start(&f.vis, f.defaultness.map(|d| d.span), &f.sig)
            }
            FunctionItem::Provided(f) => f.sig.span(),
        };
        let end = self.block()?.brace_token.span.close();

        let start = source.offset(start.start())?;
        let end = source.offset(end.end())?;
        (start <= end).then_some(start..end)
    }
}

fn declaration_start(vis: &Visibility, defaultness: Option<Span>, sig: &Signature) -> Span {
    if !matches!(vis, Visibility::Inherited) {
        return vis.span();
    }
    defaultness.unwrap_or_else(|| sig.span())
}

/// First function named `name` that has a body.
///
/// Searches free functions, inherent and trait impls, provided trait methods,
/// and inline modules, in declaration order.
pub fn find_function<'f>(file: &'f syn::File, name: &str) -> Option<FunctionSite<'f>> {
    find_in_items(&file.items, name)
}

fn find_in_items<'f>(items: &'f [Item], name: &str) -> Option<FunctionSite<'f>> {
    for item in items {
        let found = match item {
            Item::Fn(function) if function.sig.ident == name => Some(FunctionSite {
                item:      FunctionItem::Free(function),
                self_type: None,
            }),
            Item::Impl(block) => block.items.iter().find_map(|impl_item| match impl_item {
                ImplItem::Fn(method) if method.sig.ident == name => Some(FunctionSite {
                    item:      FunctionItem::Method(method),
                    self_type: type_name(&block.self_ty),
                }),
                _ => None,
            }),
            Item::Trait(definition) => {
                definition
                    .items
                    .iter()
                    .find_map(|trait_item| match trait_item {
                        TraitItem::Fn(method)
                            if method.sig.ident == name && method.default.is_some() =>
                        {
                            Some(FunctionSite {
                                item:      FunctionItem::Provided(method),
                                self_type: Some(definition.ident.to_string()),
                            })
                        }
                        _ => None,
                    })
            }
            Item::Mod(module) => module
                .content
                .as_ref()
                .and_then(|(_, items)| find_in_items(items, name)),
            _ => None,
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Parse `text` and return the source range of function `name`
pub fn function_range(text: &str, name: &str) -> Result<Range<usize>> {
    let file = parse(text)?;
    let source = SourceText::new(text);
    let site = find_function(&file, name)
        .ok_or_else(|| error_stack::Report::new(Error::analysis_failed(name, "not found")))?;
    site.range(&source)
        .ok_or_else(|| error_stack::Report::new(Error::analysis_failed(name, "unresolvable span")))
        .attach(format!("Signature: fn {}", site.sig().ident))
}

#[cfg(test)]
#[allow(clippy::expect_used, reason = "tests")]
mod tests {
    use super::*;

    const SOURCE: &str = "\
use std::fmt;

#[derive(Debug)]
struct Ledger { entries: Vec<i64> }

impl Ledger {
    #[inline]
    pub fn record(&mut self, amount: i64) {
        self.entries.push(amount);
    }
}

trait Audit {
    fn audit(&self) -> usize { 0 }
    fn required(&self);
}

mod nested {
    pub(crate) async fn deep() {}
}

/// Doc comment
fn free(x: i32) -> i32 { x + 1 }
";

    #[test]
    fn test_offsets_map_line_and_column() {
        let source = SourceText::new("ab\ncdé\nf");
        assert_eq!(source.offset(LineColumn { line: 1, column: 0 }), Some(0));
        assert_eq!(source.offset(LineColumn { line: 2, column: 1 }), Some(4));
        // Columns count characters, not bytes
        assert_eq!(source.offset(LineColumn { line: 2, column: 3 }), Some(7));
        assert_eq!(source.offset(LineColumn { line: 3, column: 1 }), Some(9));
        assert_eq!(source.offset(LineColumn { line: 4, column: 0 }), None);
        assert_eq!(source.offset(LineColumn { line: 0, column: 0 }), None);
    }

    #[test]
    fn test_finds_free_function_without_attributes() {
        let range = function_range(SOURCE, "free").expect("free fn");
        assert_eq!(&SOURCE[range], "fn free(x: i32) -> i32 { x + 1 }");
    }

    #[test]
    fn test_finds_method_with_self_type() {
        let file = parse(SOURCE).expect("parses");
        let site = find_function(&file, "record").expect("method");
        assert_eq!(site.self_type.as_deref(), Some("Ledger"));

        let range = site.range(&SourceText::new(SOURCE)).expect("range");
        let text = &SOURCE[range];
        assert!(text.starts_with("pub fn record(&mut self, amount: i64) {"));
        assert!(text.ends_with("self.entries.push(amount);\n    }"));
    }

    #[test]
    fn test_finds_provided_trait_method_only() {
        let file = parse(SOURCE).expect("parses");
        let site = find_function(&file, "audit").expect("provided method");
        assert_eq!(site.self_type.as_deref(), Some("Audit"));
        assert!(find_function(&file, "required").is_none());
    }

    #[test]
    fn test_finds_function_in_inline_module() {
        let range = function_range(SOURCE, "deep").expect("nested fn");
        assert_eq!(&SOURCE[range], "pub(crate) async fn deep() {}");
    }

    #[test]
    fn test_missing_function_is_analysis_error() {
        let error = function_range(SOURCE, "absent").expect_err("missing");
        assert!(matches!(error.current_context(), Error::Analysis(_)));
    }

    #[test]
    fn test_unparseable_source_is_analysis_error() {
        let error = parse("fn broken( {").expect_err("does not parse");
        assert!(matches!(error.current_context(), Error::Analysis(_)));
    }

    #[test]
    fn test_type_name_looks_through_references() {
        let ty: Type = syn::parse_str("&mut std::collections::HashMap<String, u8>").expect("type");
        assert_eq!(type_name(&ty).as_deref(), Some("HashMap"));
        let tuple: Type = syn::parse_str("(u8, u8)").expect("type");
        assert_eq!(type_name(&tuple), None);
    }
}
