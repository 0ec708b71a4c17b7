use crate::*;

/// The restat scenario: an idempotent generator that doesn't touch its
/// output cancels the downstream rebuild, and the build log remembers the
/// input's mtime so later builds stay clean.
#[cfg(unix)]
#[test]
fn restat_cancels_downstream() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule true_restat
  description = gen $out
  command = true
  restat = 1
rule cat
  description = cat $out
  command = cat $in > $out
build h: true_restat h.in
build out: cat h
",
    )?;
    space.write("h.in", "")?;
    space.write("h", "header")?;

    // First build: nothing is in the log yet, so both edges run.
    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 2 tasks");

    // Touch the input: the generator runs, leaves h alone, and the
    // downstream cat is cancelled.
    space.touch("h.in")?;
    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    assert_output_contains(&out, "gen h");
    assert_output_not_contains(&out, "cat out");

    // The log recorded the newest input mtime for h, so nothing is stale.
    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

/// A restat rule that does modify its output still triggers dependents.
#[cfg(unix)]
#[test]
fn restat_modified_output_propagates() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule copy_restat
  description = gen $out
  command = cp $in $out
  restat = 1
rule cat
  description = cat $out
  command = cat $in > $out
build h: copy_restat h.in
build out: cat h
",
    )?;
    space.write("h.in", "one")?;

    space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"one");

    // The generator output actually changes, so the chain reruns.
    space.write("h.in", "two")?;
    let out = space.run_expect(&mut knit_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert_eq!(space.read("out")?, b"two");
    Ok(())
}
