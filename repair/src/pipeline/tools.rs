//! Argument layout of the external repair tools

use std::path::Path;

use crate::config::BoundsStrategy;
use crate::config::Programs;
use crate::process::ToolInvocation;

/// Builds invocations for the configured tool programs
#[derive(Debug, Clone)]
pub struct RepairTools {
    programs: Programs,
    bounds:   BoundsStrategy,
}

impl RepairTools {
    pub const fn new(programs: Programs, bounds: BoundsStrategy) -> Self {
        Self { programs, bounds }
    }

    /// `controller run <in> <out> <parent-fn> <new-fn>`, rewriting `file` in place
    pub fn control_flow(&self, file: &Path, parent_fn: &str, new_fn: &str) -> ToolInvocation {
        ToolInvocation::new(&self.programs.controller)
            .arg("run")
            .arg(file)
            .arg(file)
            .arg(parent_fn)
            .arg(new_fn)
    }

    /// `borrower run <in> <out> <artifact> <parent-fn> <new-fn> <backup>`
    pub fn borrow(
        &self,
        file: &Path,
        artifact: &Path,
        parent_fn: &str,
        new_fn: &str,
        backup: &Path,
    ) -> ToolInvocation {
        ToolInvocation::new(&self.programs.borrower)
            .arg("run")
            .arg(file)
            .arg(file)
            .arg(artifact)
            .arg(parent_fn)
            .arg(new_fn)
            .arg(backup)
    }

    /// `repairer run <new-fn> <pre-repair> <post-repair> <bounds>`
    pub fn lifetime_standalone(&self, new_fn: &str, pre: &Path, post: &Path) -> ToolInvocation {
        ToolInvocation::new(&self.programs.repairer)
            .arg("run")
            .arg(new_fn)
            .arg(pre)
            .arg(post)
            .arg(self.bounds.to_string())
    }

    /// `repairer cargo <file> <manifest> <new-fn> <bounds>`, run from the project root
    pub fn lifetime_manifest(
        &self,
        file: &Path,
        manifest: &Path,
        new_fn: &str,
        project_root: &Path,
    ) -> ToolInvocation {
        ToolInvocation::new(&self.programs.repairer)
            .arg("cargo")
            .arg(file)
            .arg(manifest)
            .arg(new_fn)
            .arg(self.bounds.to_string())
            .current_dir(project_root)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::*;

    fn args(invocation: &ToolInvocation) -> Vec<OsString> {
        invocation.args.clone()
    }

    #[test]
    fn test_control_flow_passes_file_twice() {
        let tools = RepairTools::new(Programs::default(), BoundsStrategy::default());
        let invocation = tools.control_flow(Path::new("/p/main.rs"), "caller", "helper");
        assert_eq!(invocation.program, "controller");
        assert_eq!(
            args(&invocation),
            ["run", "/p/main.rs", "/p/main.rs", "caller", "helper"].map(OsString::from)
        );
        assert_eq!(invocation.working_dir, None);
    }

    #[test]
    fn test_borrow_argument_order() {
        let tools = RepairTools::new(Programs::default(), BoundsStrategy::default());
        let invocation = tools.borrow(
            Path::new("/p/main.rs"),
            Path::new("/s/calls.txt"),
            "caller",
            "helper",
            Path::new("/s/main.rs-extract.bk"),
        );
        assert_eq!(
            args(&invocation),
            [
                "run",
                "/p/main.rs",
                "/p/main.rs",
                "/s/calls.txt",
                "caller",
                "helper",
                "/s/main.rs-extract.bk",
            ]
            .map(OsString::from)
        );
    }

    #[test]
    fn test_lifetime_invocations_carry_bounds() {
        let programs = Programs {
            repairer: "/opt/bin/repairer".to_string(),
            ..Programs::default()
        };
        let tools = RepairTools::new(programs, BoundsStrategy::TightestBoundsFirst);

        let standalone =
            tools.lifetime_standalone("helper", Path::new("/s/pre.rs"), Path::new("/s/post.rs"));
        assert_eq!(standalone.program, "/opt/bin/repairer");
        assert_eq!(
            args(&standalone),
            ["run", "helper", "/s/pre.rs", "/s/post.rs", "tightest-bounds-first"].map(OsString::from)
        );

        let manifest = tools.lifetime_manifest(
            Path::new("/p/src/main.rs"),
            Path::new("/p/Cargo.toml"),
            "helper",
            Path::new("/p"),
        );
        assert_eq!(
            args(&manifest),
            ["cargo", "/p/src/main.rs", "/p/Cargo.toml", "helper", "tightest-bounds-first"]
                .map(OsString::from)
        );
        assert_eq!(manifest.working_dir.as_deref(), Some(Path::new("/p")));
    }
}
