use crate::*;

#[cfg(unix)]
const GENDEP_RULE: &str = "
rule gendep
  description = gendep $out
  command = echo \"$dep_content\" > $out.d && touch $out
  depfile = $out.d
";

#[cfg(windows)]
const GENDEP_RULE: &str = "
rule gendep
  description = gendep $out
  command = cmd /c echo $dep_content > $out.d && type nul > $out
  depfile = $out.d
";

/// depfile contains invalid syntax.
#[test]
fn bad_depfile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            GENDEP_RULE,
            "
build out: gendep
  dep_content = garbage text
",
            "",
        ]
        .join("\n"),
    )?;

    // The first build has no depfile yet and runs; the second tries to
    // parse what the first wrote.
    space.run_expect(&mut knit_command(vec!["out"]))?;
    let out = space.run(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "parse error:");
    Ok(())
}

/// A depfile dependency with no rule and no file doesn't abort the build;
/// it just keeps the edge dirty.
#[test]
fn depfile_missing_file_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            GENDEP_RULE,
            "
build out: gendep
  dep_content = out: missing_file
",
            "",
        ]
        .join("\n"),
    )?;

    space.run_expect(&mut knit_command(vec!["out"]))?;
    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

/// depfile discovers a dependency that exists; touching it rebuilds.
#[test]
fn discover_existing_dep() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            GENDEP_RULE,
            TOUCH_RULE,
            "build in: touch",
            "
build out: gendep || in
  dep_content = out: in
",
            "",
        ]
        .join("\n"),
    )?;

    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 2 tasks");

    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");

    // Touch the discovered dependency: only the consumer reruns.
    space.touch("in")?;
    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

/// deps = gcc consumes the depfile into the binary deps log.
#[cfg(unix)]
#[test]
fn gcc_deps_mode() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule cc
  description = CC $out
  command = echo \"$out: header.h\" > $out.d && touch $out
  depfile = $out.d
  deps = gcc
build foo.o: cc foo.c
",
    )?;
    space.write("foo.c", "")?;
    space.write("header.h", "")?;

    space.run_expect(&mut knit_command(vec!["foo.o"]))?;
    // The depfile was read and deleted; the deps live in the deps log now.
    assert!(!space.exists("foo.o.d"));
    assert!(space.exists(".ninja_deps"));

    let out = space.run_expect(&mut knit_command(vec!["foo.o"]))?;
    assert_output_contains(&out, "no work to do");

    // Touching the header discovered via the deps log forces a rebuild.
    space.touch("header.h")?;
    let out = space.run_expect(&mut knit_command(vec!["foo.o"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

/// -d keepdepfile leaves the depfile on disk in deps mode.
#[cfg(unix)]
#[test]
fn keepdepfile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule cc
  command = echo \"$out: header.h\" > $out.d && touch $out
  depfile = $out.d
  deps = gcc
build foo.o: cc foo.c
",
    )?;
    space.write("foo.c", "")?;
    space.write("header.h", "")?;
    space.run_expect(&mut knit_command(vec!["-d", "keepdepfile", "foo.o"]))?;
    assert!(space.exists("foo.o.d"));
    Ok(())
}
