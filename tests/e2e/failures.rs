use crate::*;

#[cfg(unix)]
const FAIL_RULE: &str = "
rule fail
  description = fail $out
  command = false
";

#[cfg(windows)]
const FAIL_RULE: &str = "
rule fail
  description = fail $out
  command = cmd /c exit 1
";

#[test]
fn single_failure() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[FAIL_RULE, "build out: fail", ""].join("\n"),
    )?;
    let out = space.run(&mut knit_command(vec!["out"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "subcommand failed");
    assert_output_not_contains(&out, "subcommands failed");
    Ok(())
}

/// With -k 3, three independent failures all get their chance before the
/// build stops.
#[test]
fn failures_drain_allowance() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            FAIL_RULE,
            "build out1: fail",
            "build out2: fail",
            "build out3: fail",
            "build all: phony out1 out2 out3",
            "",
        ]
        .join("\n"),
    )?;
    let out = space.run(&mut knit_command(vec!["-k", "3", "-j", "1", "all"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "subcommands failed");
    // All three edges reported.
    assert_output_contains(&out, "fail out1");
    assert_output_contains(&out, "fail out2");
    assert_output_contains(&out, "fail out3");
    Ok(())
}

/// A failure halfway up a chain leaves the dependents unbuilt.
#[test]
fn failure_stops_dependents() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            FAIL_RULE,
            TOUCH_RULE,
            "build mid: fail",
            "build out: touch mid",
            "",
        ]
        .join("\n"),
    )?;
    let out = space.run(&mut knit_command(vec!["out"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert!(!space.exists("out"));
    Ok(())
}
