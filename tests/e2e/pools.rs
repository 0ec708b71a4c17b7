use crate::*;

/// Two edges in a depth-1 pool may not overlap.  Each command records its
/// entry and exit; overlapping runs would interleave the markers.
#[cfg(unix)]
#[test]
fn depth_one_pool_serializes() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
pool p
  depth = 1
rule record
  description = record $out
  command = echo start-$out >> order && sleep 0.1 && echo end-$out >> order && touch $out
  pool = p
build out1: record
build out2: record
build all: phony out1 out2
",
    )?;
    space.run_expect(&mut knit_command(vec!["-j", "4", "all"]))?;

    let order = String::from_utf8(space.read("order")?)?;
    let lines: Vec<&str> = order.lines().collect();
    assert_eq!(lines.len(), 4);
    // Every start is immediately followed by its own end.
    for pair in lines.chunks(2) {
        let started = pair[0].strip_prefix("start-").unwrap();
        let ended = pair[1].strip_prefix("end-").unwrap();
        assert_eq!(started, ended);
    }
    Ok(())
}

/// Without the pool, -j4 lets both run; both must still complete.
#[test]
fn unpooled_edges_all_complete() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            TOUCH_RULE,
            "build out1: touch",
            "build out2: touch",
            "build all: phony out1 out2",
            "",
        ]
        .join("\n"),
    )?;
    let out = space.run_expect(&mut knit_command(vec!["-j", "4", "all"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert!(space.exists("out1"));
    assert!(space.exists("out2"));
    Ok(())
}

/// An unknown pool name in a rule is a load-time error.
#[test]
fn unknown_pool_rejected() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule r
  command = touch $out
  pool = nonesuch
build out: r
",
    )?;
    let out = space.run(&mut knit_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "unknown pool name 'nonesuch'");
    Ok(())
}
