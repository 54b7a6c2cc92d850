//! Mutable-receiver analysis of the extracted function.
//!
//! Produces the artifact the borrow fixer reads: one line per method call in
//! the new function whose receiver is taken by `&mut self`, in visit order.

mod collector;
mod resolver;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Serialize;
use syn::visit::Visit;

use self::collector::MutableCallCollector;
use self::resolver::SourceIndex;
use crate::error::Error;
use crate::error::Result;
use crate::syntax;
use crate::syntax::SourceText;

/// Method calls with a mutably borrowed receiver, in the order they were found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutabilityRecord {
    pub calls: Vec<String>,
}

impl MutabilityRecord {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Analyze function `new_fn` in `source` and write the artifact to `artifact`.
///
/// The artifact is truncated before anything else happens, so a failed
/// analysis never leaves a previous attempt's lines behind.
pub fn analyze(source: &str, new_fn: &str, artifact: &Path) -> Result<MutabilityRecord> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(artifact)
        .change_context(Error::io_failed("truncate", artifact, "cannot open"))?;

    let calls = collect(source, new_fn)?;

    let mut file = OpenOptions::new()
        .append(true)
        .open(artifact)
        .change_context(Error::io_failed("append to", artifact, "cannot open"))?;
    for call in &calls {
        writeln!(file, "{call}").change_context(Error::io_failed("append to", artifact, "short write"))?;
    }
    file.sync_all()
        .change_context(Error::io_failed("sync", artifact, "fsync failed"))?;

    tracing::debug!(
        "Recorded {} mutable receiver calls of `{new_fn}` in {}",
        calls.len(),
        artifact.display()
    );
    Ok(MutabilityRecord { calls })
}

/// Mutable-receiver call snippets of `new_fn`, without touching the filesystem
pub fn collect(source: &str, new_fn: &str) -> Result<Vec<String>> {
    let file = syntax::parse(source).attach(format!("While looking for `{new_fn}`"))?;
    let text = SourceText::new(source);
    let index = SourceIndex::build(&file);

    let site = syntax::find_function(&file, new_fn)
        .ok_or_else(|| Report::new(Error::analysis_failed(new_fn, "not found in file")))?;
    let block = site
        .block()
        .ok_or_else(|| Report::new(Error::analysis_failed(new_fn, "has no body")))?;

    let mut collector = MutableCallCollector::new(&text, &index, new_fn, site.self_type.clone());
    collector.bind_inputs(&site.sig().inputs);
    collector.visit_block(block);
    collector.finish()
}

#[cfg(test)]
#[allow(clippy::expect_used, reason = "tests")]
mod tests {
    use super::*;

    fn calls(source: &str, new_fn: &str) -> Vec<String> {
        collect(source, new_fn).expect("analysis succeeds")
    }

    #[test]
    fn test_records_push_on_mut_vec_parameter() {
        let source = "
            fn collect(buf: &mut Vec<i32>, n: i32) {
                for x in 0..n { extracted(buf, x); }
            }
            fn extracted(buf: &mut Vec<i32>, x: i32) {
                buf.push(x);
            }
        ";
        assert_eq!(calls(source, "extracted"), vec!["buf.push(x)"]);
    }

    #[test]
    fn test_only_calls_of_the_new_function_are_recorded() {
        let source = "
            fn parent(v: &mut Vec<u8>) { v.clear(); new_fn(v); }
            fn new_fn(v: &mut Vec<u8>) { v.len(); }
        ";
        assert!(calls(source, "new_fn").is_empty());
    }

    #[test]
    fn test_local_impl_receivers() {
        let source = "
            struct Counter { hits: Vec<u32>, total: u32 }
            impl Counter {
                fn bump(&mut self) { self.total += 1; }
                fn peek(&self) -> u32 { self.total }
                fn run(&mut self, other: &Counter) {
                    self.bump();
                    self.peek();
                    other.peek();
                    self.hits.push(self.peek());
                }
            }
        ";
        assert_eq!(
            calls(source, "run"),
            vec!["self.bump()", "self.hits.push(self.peek())"]
        );
    }

    #[test]
    fn test_nested_blocks_closures_and_post_order() {
        let source = "
            fn new_fn(items: &mut Vec<String>, log: &mut String) {
                if items.is_empty() {
                    {
                        log.push_str(\"empty\");
                    }
                }
                let mut seen = Vec::new();
                let mut add = |s: &mut Vec<u8>| s.push(1);
                add(&mut seen);
                items.iter_mut().next();
            }
        ";
        assert_eq!(
            calls(source, "new_fn"),
            vec![
                "log.push_str(\"empty\")",
                "s.push(1)",
                "items.iter_mut()",
                "items.iter_mut().next()",
            ]
        );
    }

    #[test]
    fn test_let_bindings_and_shadowing() {
        let source = "
            struct Pool { size: u8 }
            impl Pool { fn insert(&self, _v: u8) {} }
            fn new_fn() {
                let mut v: Vec<u8> = Vec::new();
                v.insert(0, 1);
                let v = Pool { size: 0 };
                v.insert(2);
            }
        ";
        assert_eq!(calls(source, "new_fn"), vec!["v.insert(0, 1)"]);
    }

    #[test]
    fn test_pattern_bindings_shadow_in_their_own_scope() {
        let source = "
            struct Pool { size: u8 }
            impl Pool { fn insert(&self, _v: u8) {} }
            fn new_fn(v: &mut Vec<u8>, o: Option<Pool>, p: Option<Pool>, q: &mut Vec<Pool>) {
                if let Some(v) = o { v.insert(1); }
                v.insert(0, 2);
                match p {
                    Some(v) if v.size > 0 => v.insert(3),
                    _ => {}
                }
                while let Some(v) = q.pop() { v.insert(4); }
            }
        ";
        assert_eq!(calls(source, "new_fn"), vec!["v.insert(0, 2)", "q.pop()"]);
    }

    #[test]
    fn test_calls_inside_macro_arguments() {
        let source = "
            fn new_fn(v: &mut Vec<u8>, out: &mut String) {
                println!(\"{:?}\", v.pop());
                assert_eq!(v.pop(), Some(1));
                let w = vec![v.pop()];
                let s = format!(\"{}\", out.len());
                out.push_str(&s);
            }
        ";
        assert_eq!(
            calls(source, "new_fn"),
            vec!["v.pop()", "v.pop()", "v.pop()", "out.push_str(&s)"]
        );
    }

    #[test]
    fn test_interior_mutability_receivers_are_not_recorded() {
        let source = "
            use std::sync::RwLock;
            use std::sync::atomic::{AtomicUsize, Ordering};
            fn new_fn(lock: &RwLock<u8>, n: &AtomicUsize, v: &mut Vec<u8>) {
                lock.write();
                n.swap(1, Ordering::SeqCst);
                v.swap(0, 1);
            }
        ";
        assert_eq!(calls(source, "new_fn"), vec!["v.swap(0, 1)"]);
    }

    #[test]
    fn test_multi_line_call_is_one_artifact_line() {
        let source = "
            fn new_fn(out: &mut Vec<(u8, u8)>) {
                out.push((
                    1,
                    2,
                ));
            }
        ";
        assert_eq!(calls(source, "new_fn"), vec!["out.push(( 1, 2, ))"]);
    }

    #[test]
    fn test_missing_function_is_analysis_error() {
        let error = collect("fn other() {}", "new_fn").expect_err("not found");
        assert!(matches!(error.current_context(), Error::Analysis(_)));
    }

    #[test]
    fn test_artifact_is_truncated_every_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = dir.path().join("method_call_mutability.txt");
        std::fs::write(&artifact, "stale.push(1)\n").expect("seed");

        let record = analyze(
            "fn new_fn(v: &mut Vec<u8>) { v.push(2); v.pop(); }",
            "new_fn",
            &artifact,
        )
        .expect("analysis");
        assert_eq!(record.len(), 2);
        assert_eq!(
            std::fs::read_to_string(&artifact).expect("artifact"),
            "v.push(2)\nv.pop()\n"
        );

        // A failed run still leaves an empty artifact behind
        analyze("fn broken(", "new_fn", &artifact).expect_err("unparseable");
        assert_eq!(std::fs::read_to_string(&artifact).expect("artifact"), "");
    }

    #[test]
    fn test_sample_project_extraction() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../sample-project/src/main.rs");
        let source = std::fs::read_to_string(path).expect("fixture");
        assert_eq!(calls(&source, "extracted"), vec!["buf.push(x)"]);
    }
}
