//! Standalone lifetime repair unit: the parent and new functions copied into a
//! minimal compilable file, and the repaired copies spliced back.

use std::ops::Range;

use error_stack::Report;
use error_stack::ResultExt;

use crate::error::Error;
use crate::error::Result;
use crate::syntax;

/// `#[allow(dead_code)]`, the parent, the new function and an empty `main`
pub fn build_unit(source: &str, parent_fn: &str, new_fn: &str) -> Result<String> {
    let parent = syntax::function_range(source, parent_fn)?;
    let new = syntax::function_range(source, new_fn)?;
    Ok(format!(
        "#[allow(dead_code)]\n{}\n{}\nfn main() {{}}\n",
        &source[parent],
        &source[new]
    ))
}

/// Replace the parent and new functions in `source` with their repaired
/// versions from `repaired_unit`, leaving everything else untouched
pub fn splice(source: &str, repaired_unit: &str, parent_fn: &str, new_fn: &str) -> Result<String> {
    let repaired_parent = syntax::function_range(repaired_unit, parent_fn)
        .attach("In the repaired unit")?;
    let repaired_new = syntax::function_range(repaired_unit, new_fn).attach("In the repaired unit")?;

    let mut edits: Vec<(Range<usize>, &str)> = vec![
        (
            syntax::function_range(source, parent_fn)?,
            &repaired_unit[repaired_parent],
        ),
        (
            syntax::function_range(source, new_fn)?,
            &repaired_unit[repaired_new],
        ),
    ];
    // Apply back to front so earlier ranges stay valid
    edits.sort_by_key(|(range, _)| std::cmp::Reverse(range.start));
    if let [(later, _), (earlier, _)] = edits.as_slice()
        && earlier.end > later.start
    {
        return Err(Report::new(Error::analysis_failed(
            new_fn,
            format!("overlaps `{parent_fn}`, cannot splice"),
        )));
    }

    let mut spliced = source.to_string();
    for (range, replacement) in edits {
        spliced.replace_range(range, replacement);
    }
    Ok(spliced)
}

#[cfg(test)]
#[allow(clippy::expect_used, reason = "tests")]
mod tests {
    use super::*;

    const SOURCE: &str = "\
use std::collections::HashMap;

struct Unrelated;

fn caller(map: &mut HashMap<String, String>) {
    let first = helper(map, \"a\");
    println!(\"{first}\");
}

#[inline]
fn helper(map: &HashMap<String, String>, key: &str) -> &String {
    &map[key]
}

fn tail() {}
";

    #[test]
    fn test_unit_holds_both_functions_and_main() {
        let unit = build_unit(SOURCE, "caller", "helper").expect("unit");
        assert!(unit.starts_with("#[allow(dead_code)]\nfn caller("));
        assert!(unit.contains("\nfn helper(map: &HashMap<String, String>, key: &str) -> &String {"));
        assert!(unit.ends_with("\nfn main() {}\n"));
        assert!(!unit.contains("Unrelated"));
        syn::parse_file(&unit).expect("unit parses");
    }

    #[test]
    fn test_splice_replaces_only_the_two_functions() {
        let repaired = "\
#[allow(dead_code)]
fn caller(map: &mut HashMap<String, String>) {
    let first = helper(map, \"a\");
    println!(\"{first}\");
}
fn helper<'a>(map: &'a HashMap<String, String>, key: &str) -> &'a String {
    &map[key]
}
fn main() {}
";
        let spliced = splice(SOURCE, repaired, "caller", "helper").expect("splice");
        assert!(spliced.contains(
            "#[inline]\nfn helper<'a>(map: &'a HashMap<String, String>, key: &str) -> &'a String {"
        ));
        // The unit's allow attribute does not leak into the file
        assert!(!spliced.contains("dead_code"));
        assert!(!spliced.contains("fn main"));
        assert!(spliced.starts_with("use std::collections::HashMap;\n\nstruct Unrelated;\n"));
        assert!(spliced.ends_with("\nfn tail() {}\n"));
    }

    #[test]
    fn test_splice_requires_both_functions_in_unit() {
        let error = splice(SOURCE, "fn caller() {}\nfn main() {}", "caller", "helper")
            .expect_err("helper missing");
        assert!(matches!(error.current_context(), Error::Analysis(_)));
    }
}
