use crate::*;

#[test]
fn empty_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", "")?;
    let out = space.run(&mut knit_command(vec![]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut knit_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());
    Ok(())
}

#[test]
fn create_subdir() -> anyhow::Result<()> {
    // A build rule whose output needs a subdir automatically created.
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build subdir/out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut knit_command(vec!["subdir/out"]))?;
    assert!(space.read("subdir/out").is_ok());
    Ok(())
}

/// The two-step chain: both commands run in dependency order, and a second
/// invocation does nothing.
#[test]
fn two_step_chain_then_up_to_date() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[CAT_RULE, "build mid: cat in", "build out: cat mid", ""].join("\n"),
    )?;
    space.write("in", "hello")?;

    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert_eq!(space.read("out")?, b"hello");

    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn rebuild_on_input_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[CAT_RULE, "build out: cat in", ""].join("\n"),
    )?;
    space.write("in", "one")?;
    space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"one");

    space.write("in", "two")?;
    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    assert_eq!(space.read("out")?, b"two");
    Ok(())
}

#[test]
fn rebuild_on_command_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let manifest = |flag: &str| {
        format!(
            "rule write\n  command = echo {} > $out\nbuild out: write\n",
            flag
        )
    };
    space.write("build.ninja", &manifest("one"))?;
    space.run_expect(&mut knit_command(vec!["out"]))?;

    // Same manifest: no work.
    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");

    // Edit the command line: the edge reruns.
    space.write("build.ninja", &manifest("two"))?;
    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

#[test]
fn unknown_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch", ""].join("\n"),
    )?;
    let out = space.run(&mut knit_command(vec!["nonesuch"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "unknown target 'nonesuch'");
    Ok(())
}

#[test]
fn missing_source_reports_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[CAT_RULE, "build out: cat in", ""].join("\n"),
    )?;
    let out = space.run(&mut knit_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "'in', needed by 'out', missing and no known rule to make it");
    Ok(())
}

#[test]
fn dependency_cycle_reported() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[CAT_RULE, "build a: cat b", "build b: cat a", ""].join("\n"),
    )?;
    let out = space.run(&mut knit_command(vec!["a"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "dependency cycle: a -> b -> a");
    Ok(())
}

#[test]
fn default_targets_used() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            TOUCH_RULE,
            "build a: touch",
            "build b: touch",
            "default b",
            "",
        ]
        .join("\n"),
    )?;
    space.run_expect(&mut knit_command(vec![]))?;
    assert!(!space.exists("a"));
    assert!(space.exists("b"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn generate_rsp_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule cat_rsp
  command = cat ${out}.rsp > ${out}
  rspfile = ${out}.rsp
  rspfile_content = 1 $in 2 $in_newline 3

rule touch
  command = touch $out

build main: cat_rsp foo bar baz in
build foo: touch bar
build bar: touch baz
build baz: touch in
",
    )?;
    space.write("in", "go!")?;

    space.run_expect(&mut knit_command(vec!["main"]))?;

    // The 'main' target copies the contents of its rsp file to its output.
    let main_rsp = space.read("main")?;
    assert_eq!(main_rsp, b"1 foo bar baz in 2 foo\nbar\nbaz\nin 3");

    // The rsp file itself is cleaned up on success.
    assert!(!space.exists("main.rsp"));

    // Run again: everything should be up to date.
    let out = space.run_expect(&mut knit_command(vec!["main"]))?;
    assert_output_contains(&out, "no work");
    Ok(())
}

#[cfg(unix)]
#[test]
fn keeprsp_preserves_rsp_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule cat_rsp
  command = cat ${out}.rsp > ${out}
  rspfile = ${out}.rsp
  rspfile_content = $in
build out: cat_rsp in
",
    )?;
    space.write("in", "")?;
    space.run_expect(&mut knit_command(vec!["-d", "keeprsp", "out"]))?;
    assert!(space.exists("out.rsp"));
    Ok(())
}

/// Run a task that prints something, and verify it shows up.
#[cfg(unix)]
#[test]
fn spam_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule quiet
  description = quiet $out
  command = touch $out
rule spam
  description = spam $out
  command = echo greetz from $out && touch $out
build a: quiet
build b: spam a
build c: quiet b
",
    )?;
    let out = space.run_expect(&mut knit_command(vec!["c"]))?;
    assert_output_contains(&out, "greetz from b");
    Ok(())
}

#[test]
fn explain_describes_dirtiness() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut knit_command(vec!["-d", "explain", "out"]))?;
    assert_output_contains(&out, "knit explain:");
    Ok(())
}
