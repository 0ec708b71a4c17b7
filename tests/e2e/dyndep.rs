use crate::*;

/// A built dyndep file introduces a new input, which gets built before the
/// edge that depends on it.
#[cfg(unix)]
#[test]
fn dyndep_discovers_input() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule touch
  description = touch $out
  command = touch $out
rule cpdd
  description = cpdd $out
  command = cp dd-src dd
build dd: cpdd dd-src
build in: touch
build out: touch || dd
  dyndep = dd
",
    )?;
    space.write("dd-src", "ninja_dyndep_version = 1\nbuild out: dyndep | in\n")?;

    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 3 tasks");
    assert!(space.exists("in"));
    assert!(space.exists("out"));

    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

/// A dyndep file already on disk is loaded during the scan.
#[test]
fn dyndep_on_disk_applies_restat() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            TOUCH_RULE,
            "
build out: touch || dd
  dyndep = dd
",
            "",
        ]
        .join("\n"),
    )?;
    space.write("dd", "ninja_dyndep_version = 1\nbuild out: dyndep\n  restat = 1\n")?;

    space.run_expect(&mut knit_command(vec!["out"]))?;
    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

/// A missing dyndep file with no rule to build it is an error.
#[test]
fn dyndep_missing_with_no_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            TOUCH_RULE,
            "
build out: touch || dd
  dyndep = dd
",
            "",
        ]
        .join("\n"),
    )?;
    let out = space.run(&mut knit_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "loading 'dd': No such file or directory");
    Ok(())
}

/// The dyndep file must mention every edge bound to it.
#[test]
fn dyndep_must_mention_edge() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            TOUCH_RULE,
            "
build out: touch || dd
  dyndep = dd
",
            "",
        ]
        .join("\n"),
    )?;
    space.write("dd", "ninja_dyndep_version = 1\n")?;
    let out = space.run(&mut knit_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "'out' not mentioned in its dyndep file 'dd'");
    Ok(())
}
