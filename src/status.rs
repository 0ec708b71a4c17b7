//! Build status tracking and reporting: progress counters, rate windows,
//! and a terminal line printer that overprints on smart terminals.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::time::Instant;

use anyhow::bail;

use crate::graph::{Edge, EdgeId};
use crate::terminal;

/// Trait for build progress notifications, so tests can observe builds
/// without a terminal.
pub trait Progress {
    /// The number of commands the plan intends to run; may shrink when
    /// restat cancels work.
    fn plan_has_total_edges(&mut self, total: usize);

    fn build_started(&mut self);

    fn edge_started(&mut self, id: EdgeId, edge: &Edge);

    /// Returns the edge's (start, end) times in milliseconds since the
    /// build started, for the build log.
    fn edge_finished(&mut self, id: EdgeId, edge: &Edge, success: bool, output: &[u8])
        -> (i32, i32);

    fn build_finished(&mut self);

    /// Print a line without corrupting the progress display.
    fn log(&mut self, msg: &str);
}

pub const DEFAULT_STATUS_FORMAT: &str = "[%f/%t] ";

/// How many completions the sliding rate window covers.
const CURRENT_RATE_WINDOW: usize = 5;

/// Elide the middle of a string to fit the given width.
pub fn elide_middle(text: &str, width: usize) -> String {
    if width <= 3 {
        return ".".repeat(width);
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= width {
        return text.to_string();
    }
    let elide_size = (width - 3) / 2;
    let head: String = chars[..elide_size].iter().collect();
    let tail: String = chars[chars.len() - elide_size..].iter().collect();
    format!("{}...{}", head, tail)
}

#[derive(Clone, Copy, PartialEq)]
pub enum LineType {
    Full,
    Elide,
}

/// Prints lines to the terminal, overprinting the previous line when the
/// terminal supports it and buffering while a console edge owns the screen.
pub struct LinePrinter {
    smart_terminal: bool,
    /// Whether the caret sits on a blank line.
    have_blank_line: bool,
    console_locked: bool,
    line_buffer: String,
    line_type: LineType,
    output_buffer: String,
}

impl LinePrinter {
    pub fn new() -> LinePrinter {
        LinePrinter {
            smart_terminal: terminal::is_smart(),
            have_blank_line: true,
            console_locked: false,
            line_buffer: String::new(),
            line_type: LineType::Full,
            output_buffer: String::new(),
        }
    }

    pub fn is_smart_terminal(&self) -> bool {
        self.smart_terminal
    }

    /// Overprint the current line.  If type is Elide, the text is
    /// middle-elided to fit the terminal.
    pub fn print(&mut self, text: &str, line_type: LineType) {
        if self.console_locked {
            self.line_buffer = text.to_string();
            self.line_type = line_type;
            return;
        }
        if self.smart_terminal {
            let line = match line_type {
                LineType::Elide => {
                    elide_middle(text, terminal::get_cols().unwrap_or(80))
                }
                LineType::Full => text.to_string(),
            };
            print!("\r{}\x1b[K", line);
            let _ = std::io::stdout().flush();
            self.have_blank_line = false;
        } else {
            println!("{}", text);
        }
    }

    /// Print a complete line, scrolling any status line out of the way
    /// first.
    pub fn print_on_new_line(&mut self, text: &str) {
        if self.console_locked && !self.line_buffer.is_empty() {
            self.output_buffer.push_str(&self.line_buffer);
            self.output_buffer.push('\n');
            self.line_buffer.clear();
        }
        if !self.have_blank_line {
            println!();
        }
        if !text.is_empty() {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
        self.have_blank_line = text.is_empty() || text.ends_with('\n');
    }

    /// While locked, status updates are buffered; a console-pool edge owns
    /// the terminal.
    pub fn set_console_locked(&mut self, locked: bool) {
        if locked == self.console_locked {
            return;
        }
        if locked {
            self.print_on_new_line("");
        }
        self.console_locked = locked;
        if !locked {
            let output = std::mem::take(&mut self.output_buffer);
            self.print_on_new_line(&output);
            let line = std::mem::take(&mut self.line_buffer);
            if !line.is_empty() {
                self.print(&line, self.line_type);
            }
        }
    }
}

/// Overall edges-per-second since the build started.
struct RateInfo {
    rate: f64,
}

impl RateInfo {
    fn new() -> RateInfo {
        RateInfo { rate: -1.0 }
    }

    fn update(&mut self, edges: usize, elapsed: f64) {
        if edges > 0 && elapsed > 0.0 {
            self.rate = edges as f64 / elapsed;
        }
    }
}

/// Edges-per-second over the last few completions.
struct SlidingRateInfo {
    rate: f64,
    window: usize,
    times: VecDeque<f64>,
    last_update: Option<usize>,
}

impl SlidingRateInfo {
    fn new(window: usize) -> SlidingRateInfo {
        SlidingRateInfo {
            rate: -1.0,
            window,
            times: VecDeque::new(),
            last_update: None,
        }
    }

    fn update(&mut self, update_hint: usize, elapsed: f64) {
        if self.last_update == Some(update_hint) {
            return;
        }
        self.last_update = Some(update_hint);
        if self.times.len() == self.window {
            self.times.pop_front();
        }
        self.times.push_back(elapsed);
        let (front, back) = (self.times.front(), self.times.back());
        if let (Some(&front), Some(&back)) = (front, back) {
            if back != front {
                self.rate = self.times.len() as f64 / (back - front);
            }
        }
    }
}

fn format_rate(rate: f64) -> String {
    if rate < 0.0 {
        "?".to_string()
    } else {
        format!("{:.1}", rate)
    }
}

/// The console status line: progress placeholders, per-edge messages, and
/// full-line output for failures and console edges.
pub struct StatusPrinter {
    /// Print full command lines rather than descriptions.
    verbose: bool,
    progress_status_format: String,
    printer: LinePrinter,
    start_time: Instant,
    started_edges: usize,
    finished_edges: usize,
    total_edges: usize,
    /// Running edge -> start time in ms since the build started.
    running_edges: HashMap<EdgeId, i32>,
    overall_rate: RateInfo,
    current_rate: SlidingRateInfo,
}

impl StatusPrinter {
    pub fn new(verbose: bool) -> anyhow::Result<StatusPrinter> {
        let progress_status_format = std::env::var("NINJA_STATUS")
            .unwrap_or_else(|_| DEFAULT_STATUS_FORMAT.to_string());
        let mut status = StatusPrinter {
            verbose,
            progress_status_format,
            printer: LinePrinter::new(),
            start_time: Instant::now(),
            started_edges: 0,
            finished_edges: 0,
            total_edges: 0,
            running_edges: HashMap::new(),
            overall_rate: RateInfo::new(),
            current_rate: SlidingRateInfo::new(CURRENT_RATE_WINDOW),
        };
        // Fail fast on a bad NINJA_STATUS rather than mid-build.
        let format = status.progress_status_format.clone();
        status.format_progress_status(&format)?;
        Ok(status)
    }

    fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn elapsed_ms(&self) -> i32 {
        self.start_time.elapsed().as_millis() as i32
    }

    /// Expand the `%`-placeholders of a progress format string.
    pub fn format_progress_status(&mut self, format: &str) -> anyhow::Result<String> {
        let mut out = String::new();
        let mut chars = format.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => out.push('%'),
                // Started edges.
                Some('s') => out.push_str(&self.started_edges.to_string()),
                // Total edges.
                Some('t') => out.push_str(&self.total_edges.to_string()),
                // Running edges.
                Some('r') => out.push_str(&self.running_edges.len().to_string()),
                // Unstarted edges.
                Some('u') => out.push_str(
                    &self
                        .total_edges
                        .saturating_sub(self.started_edges)
                        .to_string(),
                ),
                // Finished edges.
                Some('f') => out.push_str(&self.finished_edges.to_string()),
                // Elapsed time in seconds.
                Some('e') => out.push_str(&format!("{:.3}", self.elapsed_secs())),
                // Overall rate of finished edges per second.
                Some('o') => {
                    self.overall_rate
                        .update(self.finished_edges, self.elapsed_secs());
                    out.push_str(&format_rate(self.overall_rate.rate));
                }
                // Rate over the last few finished edges.
                Some('c') => {
                    self.current_rate
                        .update(self.finished_edges, self.elapsed_secs());
                    out.push_str(&format_rate(self.current_rate.rate));
                }
                // Percentage of finished edges.
                Some('p') => {
                    let percent = 100 * self.finished_edges / self.total_edges.max(1);
                    out.push_str(&format!("{:3}%", percent));
                }
                other => {
                    let what = other.map(String::from).unwrap_or_default();
                    bail!("unknown placeholder '%{}' in NINJA_STATUS", what);
                }
            }
        }
        Ok(out)
    }

    fn edge_message<'b>(&self, edge: &'b Edge) -> &'b str {
        if !self.verbose {
            if let Some(desc) = edge.desc.as_deref() {
                if !desc.is_empty() {
                    return desc;
                }
            }
        }
        edge.cmdline.as_deref().unwrap_or("phony")
    }

    fn print_status(&mut self, edge: &Edge) {
        let format = self.progress_status_format.clone();
        let prefix = self
            .format_progress_status(&format)
            .expect("status format was validated at startup");
        let message = format!("{}{}", prefix, self.edge_message(edge));
        let line_type = if self.verbose {
            LineType::Full
        } else {
            LineType::Elide
        };
        self.printer.print(&message, line_type);
    }
}

impl Progress for StatusPrinter {
    fn plan_has_total_edges(&mut self, total: usize) {
        self.total_edges = total;
    }

    fn build_started(&mut self) {
        self.start_time = Instant::now();
    }

    fn edge_started(&mut self, id: EdgeId, edge: &Edge) {
        self.started_edges += 1;
        let start = self.elapsed_ms();
        self.running_edges.insert(id, start);
        if edge.use_console() {
            self.printer.set_console_locked(true);
        }
        self.print_status(edge);
    }

    fn edge_finished(
        &mut self,
        id: EdgeId,
        edge: &Edge,
        success: bool,
        output: &[u8],
    ) -> (i32, i32) {
        self.finished_edges += 1;
        let start = self.running_edges.remove(&id).unwrap_or(0);
        let end = self.elapsed_ms();

        if edge.use_console() {
            self.printer.set_console_locked(false);
        }
        self.print_status(edge);

        if !success {
            self.printer.print_on_new_line(&format!(
                "FAILED: {}\n{}\n",
                self.edge_message(edge),
                edge.cmdline.as_deref().unwrap_or("")
            ));
        }
        if !output.is_empty() {
            // Commands' output is only shown on failure or when nonempty,
            // always as complete lines of its own.
            let mut text = String::from_utf8_lossy(output).into_owned();
            if !text.ends_with('\n') {
                text.push('\n');
            }
            self.printer.print_on_new_line(&text);
        }

        (start, end)
    }

    fn build_finished(&mut self) {
        self.printer.set_console_locked(false);
        self.printer.print_on_new_line("");
    }

    fn log(&mut self, msg: &str) {
        self.printer.print_on_new_line(&format!("knit: {}\n", msg));
    }
}
