use std::collections::HashMap;

use error_stack::Report;
use syn::Expr;
use syn::FnArg;
use syn::Pat;
use syn::Token;
use syn::parse::ParseStream;
use syn::spanned::Spanned;
use syn::visit::Visit;

use super::resolver::ReceiverKind;
use super::resolver::ReceiverResolver;
use crate::error::Error;
use crate::syntax::SourceText;
use crate::syntax::type_name;

/// Binding name -> type name, `None` when a binding shadows with an unknown type
type Scope = HashMap<String, Option<String>>;

/// Walks a function body and collects the source text of every method call
/// whose receiver is taken by `&mut self`.
///
/// Calls are recorded after their receiver and arguments, so in
/// `a.b().c()` the snippet for `a.b()` comes first.
pub struct MutableCallCollector<'s, 'r> {
    source:    &'s SourceText<'s>,
    resolver:  &'r dyn ReceiverResolver,
    function:  String,
    self_type: Option<String>,
    scopes:    Vec<Scope>,
    calls:     Vec<String>,
    error:     Option<Report<Error>>,
}

impl<'s, 'r> MutableCallCollector<'s, 'r> {
    pub fn new(
        source: &'s SourceText<'s>,
        resolver: &'r dyn ReceiverResolver,
        function: &str,
        self_type: Option<String>,
    ) -> Self {
        Self {
            source,
            resolver,
            function: function.to_string(),
            self_type,
            scopes: vec![Scope::new()],
            calls: Vec::new(),
            error: None,
        }
    }

    /// Bind the function's parameters before walking its body
    pub fn bind_inputs<'a>(&mut self, inputs: impl IntoIterator<Item = &'a FnArg>) {
        for input in inputs {
            if let FnArg::Typed(typed) = input {
                self.bind_pattern(&typed.pat, type_name(&typed.ty));
            }
        }
    }

    /// Collected snippets, or the first failure met during the walk
    pub fn finish(self) -> crate::error::Result<Vec<String>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.calls),
        }
    }

    fn bind(&mut self, name: String, ty: Option<String>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, ty);
        }
    }

    fn bind_pattern(&mut self, pat: &Pat, ty: Option<String>) {
        match pat {
            Pat::Ident(ident) => self.bind(ident.ident.to_string(), ty),
            Pat::Type(typed) => self.bind_pattern(&typed.pat, type_name(&typed.ty)),
            Pat::Reference(reference) => self.bind_pattern(&reference.pat, ty),
            Pat::Paren(paren) => self.bind_pattern(&paren.pat, ty),
            // Destructured bindings have types we cannot name
            Pat::Tuple(tuple) => {
                for element in &tuple.elems {
                    self.bind_pattern(element, None);
                }
            }
            Pat::TupleStruct(tuple) => {
                for element in &tuple.elems {
                    self.bind_pattern(element, None);
                }
            }
            Pat::Struct(structure) => {
                for field in &structure.fields {
                    self.bind_pattern(&field.pat, None);
                }
            }
            Pat::Slice(slice) => {
                for element in &slice.elems {
                    self.bind_pattern(element, None);
                }
            }
            Pat::Or(or) => {
                for case in &or.cases {
                    self.bind_pattern(case, None);
                }
            }
            _ => {}
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if name == "self" {
            return self.self_type.clone();
        }
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .cloned()
            .flatten()
    }

    /// Type name of an expression, as far as the source spells it out
    fn type_of(&self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::Path(path) => {
                let ident = path.path.get_ident()?;
                self.lookup(&ident.to_string())
            }
            Expr::Field(field) => {
                let owner = self.type_of(&field.base)?;
                let syn::Member::Named(member) = &field.member else {
                    return None;
                };
                self.resolver.field_type(&owner, &member.to_string())
            }
            Expr::Paren(paren) => self.type_of(&paren.expr),
            Expr::Group(group) => self.type_of(&group.expr),
            Expr::Reference(reference) => self.type_of(&reference.expr),
            Expr::Unary(unary) if matches!(unary.op, syn::UnOp::Deref(_)) => {
                self.type_of(&unary.expr)
            }
            _ => None,
        }
    }

    /// Type name a `let` initializer evidently produces
    fn infer_init(&self, init: &Expr) -> Option<String> {
        match init {
            // `Type::new(..)`, `Type::with_capacity(..)`
            Expr::Call(call) => {
                let Expr::Path(path) = call.func.as_ref() else {
                    return None;
                };
                let segments = &path.path.segments;
                let len = segments.len();
                if len < 2 {
                    return None;
                }
                segments.get(len - 2).map(|segment| segment.ident.to_string())
            }
            Expr::Struct(literal) => literal
                .path
                .segments
                .last()
                .map(|segment| segment.ident.to_string()),
            Expr::Macro(invocation) if invocation.mac.path.is_ident("vec") => {
                Some("Vec".to_string())
            }
            Expr::Reference(reference) => self.infer_init(&reference.expr),
            Expr::Paren(paren) => self.infer_init(&paren.expr),
            Expr::Path(_) | Expr::Field(_) => self.type_of(init),
            _ => None,
        }
    }

    fn record(&mut self, call: &syn::ExprMethodCall) {
        let receiver_type = self.type_of(&call.receiver);
        let method = call.method.to_string();
        let kind = self.resolver.receiver_kind(receiver_type.as_deref(), &method);
        tracing::trace!(
            "Call .{method}() on {} resolves to {kind:?}",
            receiver_type.as_deref().unwrap_or("<unknown>")
        );
        if kind != Some(ReceiverKind::MutRef) {
            return;
        }

        let span = call.span();
        match self.source.slice(span) {
            Some(text) => self.calls.push(single_line(text)),
            None => {
                if self.error.is_none() {
                    let at = span.start();
                    self.error = Some(
                        Report::new(Error::analysis_failed(
                            &self.function,
                            format!(".{method}() has no source text"),
                        ))
                        .attach(format!("At line {}, column {}", at.line, at.column + 1)),
                    );
                }
            }
        }
    }
}

impl<'ast> Visit<'ast> for MutableCallCollector<'_, '_> {
    fn visit_block(&mut self, block: &'ast syn::Block) {
        self.scopes.push(Scope::new());
        syn::visit::visit_block(self, block);
        self.scopes.pop();
    }

    fn visit_local(&mut self, local: &'ast syn::Local) {
        // The initializer runs before the new binding is in scope
        let inferred = local.init.as_ref().and_then(|init| {
            self.visit_local_init(init);
            self.infer_init(&init.expr)
        });
        self.bind_pattern(&local.pat, inferred);
    }

    fn visit_expr_closure(&mut self, closure: &'ast syn::ExprClosure) {
        self.scopes.push(Scope::new());
        for input in &closure.inputs {
            self.bind_pattern(input, None);
        }
        self.visit_expr(&closure.body);
        self.scopes.pop();
    }

    fn visit_expr_for_loop(&mut self, for_loop: &'ast syn::ExprForLoop) {
        self.visit_expr(&for_loop.expr);
        self.scopes.push(Scope::new());
        self.bind_pattern(&for_loop.pat, None);
        self.visit_block(&for_loop.body);
        self.scopes.pop();
    }

    fn visit_expr_if(&mut self, expr_if: &'ast syn::ExprIf) {
        // `if let` bindings are visible in the then branch only
        self.scopes.push(Scope::new());
        self.visit_expr(&expr_if.cond);
        self.visit_block(&expr_if.then_branch);
        self.scopes.pop();
        if let Some((_, else_branch)) = &expr_if.else_branch {
            self.visit_expr(else_branch);
        }
    }

    fn visit_expr_while(&mut self, expr_while: &'ast syn::ExprWhile) {
        self.scopes.push(Scope::new());
        self.visit_expr(&expr_while.cond);
        self.visit_block(&expr_while.body);
        self.scopes.pop();
    }

    fn visit_expr_let(&mut self, expr_let: &'ast syn::ExprLet) {
        self.visit_expr(&expr_let.expr);
        self.bind_pattern(&expr_let.pat, None);
    }

    fn visit_arm(&mut self, arm: &'ast syn::Arm) {
        self.scopes.push(Scope::new());
        self.bind_pattern(&arm.pat, None);
        if let Some((_, guard)) = &arm.guard {
            self.visit_expr(guard);
        }
        self.visit_expr(&arm.body);
        self.scopes.pop();
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        match mac.parse_body_with(macro_arguments) {
            Ok(arguments) => {
                for argument in &arguments {
                    syn::visit::visit_expr(self, argument);
                }
            }
            Err(e) => {
                let name = mac
                    .path
                    .segments
                    .last()
                    .map(|segment| segment.ident.to_string())
                    .unwrap_or_default();
                tracing::trace!("Arguments of `{name}!` are not expressions: {e}");
            }
        }
    }

    fn visit_expr_method_call(&mut self, call: &'ast syn::ExprMethodCall) {
        syn::visit::visit_expr_method_call(self, call);
        self.record(call);
    }

    // Items nested in a body are separate functions
    fn visit_item(&mut self, _item: &'ast syn::Item) {}
}

/// Macro input read as expressions separated by `,` or `;`, which covers
/// `format!`-style, `assert!`-style and `vec![x; n]` invocations
fn macro_arguments(input: ParseStream) -> syn::Result<Vec<Expr>> {
    let mut arguments = Vec::new();
    while !input.is_empty() {
        arguments.push(input.parse::<Expr>()?);
        if input.is_empty() {
            break;
        }
        if input.peek(Token![;]) {
            input.parse::<Token![;]>()?;
        } else {
            input.parse::<Token![,]>()?;
        }
    }
    Ok(arguments)
}

/// Join a multi-line snippet into one line, collapsing each line break and
/// the indentation around it into a single space
fn single_line(text: &str) -> String {
    if !text.contains('\n') {
        return text.to_string();
    }
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[allow(clippy::expect_used, reason = "tests")]
mod tests {
    use super::*;

    #[test]
    fn test_macro_arguments_accept_both_separators() {
        let mac: syn::Macro = syn::parse_str("vec![v.pop(); 3]").expect("macro");
        assert_eq!(mac.parse_body_with(macro_arguments).expect("args").len(), 2);
        let mac: syn::Macro = syn::parse_str("println!(\"{} {x}\", a, x = b,)").expect("macro");
        assert_eq!(mac.parse_body_with(macro_arguments).expect("args").len(), 3);
        let mac: syn::Macro = syn::parse_str("quote!(fn #name() {})").expect("macro");
        assert!(mac.parse_body_with(macro_arguments).is_err());
    }

    #[test]
    fn test_single_line_keeps_short_snippets() {
        assert_eq!(single_line("buf.push(x)"), "buf.push(x)");
    }

    #[test]
    fn test_single_line_collapses_breaks() {
        assert_eq!(
            single_line("items\n        .push(\n            value,\n        )"),
            "items .push( value, )"
        );
    }
}
