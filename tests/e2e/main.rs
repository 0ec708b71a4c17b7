//! Support code for e2e tests, which run the knit binary against a
//! temporary directory.

mod basic;
mod discovered;
mod dyndep;
mod failures;
mod pools;
mod restat;

pub fn knit_binary() -> std::path::PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join("knit")
}

pub fn knit_command(args: Vec<&str>) -> std::process::Command {
    let mut cmd = std::process::Command::new(knit_binary());
    cmd.args(args);
    cmd
}

fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so the Rust test
    // framework can capture it.
    print!("{}", String::from_utf8_lossy(&out.stdout));
    print!("{}", String::from_utf8_lossy(&out.stderr));
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    if !stdout.contains(text) && !stderr.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}{}",
            text, stdout, stderr
        );
    }
}

pub fn assert_output_not_contains(out: &std::process::Output, text: &str) {
    let stdout = String::from_utf8_lossy(&out.stdout);
    if stdout.contains(text) {
        panic!(
            "assertion failed; expected output to not contain {:?} but got:\n{}",
            text, stdout
        );
    }
}

/// Manages a temporary directory for invoking knit.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.dir.path().join(path), content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dir.path().join(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }

    /// Bump a file's mtime the way a user's edit would.
    pub fn touch(&self, path: &str) -> std::io::Result<()> {
        let path = self.dir.path().join(path);
        let content = std::fs::read(&path).unwrap_or_default();
        std::fs::write(path, content)
    }

    /// Invoke knit, returning process output.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but also print output if the build failed.
    pub fn run_expect(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("build failed, status {}", out.status);
        }
        Ok(out)
    }
}

// Ensure TOUCH_RULE has the same description and number of lines of text
// on Windows/non-Windows to make tests agnostic to platform.

#[cfg(unix)]
pub const TOUCH_RULE: &str = "
rule touch
  command = touch $out
  description = touch $out
";

#[cfg(windows)]
pub const TOUCH_RULE: &str = "
rule touch
  command = cmd /c type nul > $out
  description = touch $out
";

#[cfg(unix)]
pub const CAT_RULE: &str = "
rule cat
  command = cat $in > $out
  description = cat $out
";

#[cfg(windows)]
pub const CAT_RULE: &str = "
rule cat
  command = cmd /c type $in > $out
  description = cat $out
";
