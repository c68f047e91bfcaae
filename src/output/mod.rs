use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporting used by the orchestrator and the services it drives.
///
/// Two implementations: [`Plain`] prints sequential step lines, [`Live`]
/// additionally runs a spinner while a step is in flight. The orchestrator
/// only ever talks to the trait, so nothing reaches into ambient state.
pub trait Reporter: Send + Sync {
    fn step(&self, num: usize, total: usize, msg: &str);
    fn success(&self, msg: &str);
    fn error(&self, msg: &str);
    fn warning(&self, msg: &str);
    fn info(&self, msg: &str);
    fn header(&self, msg: &str);

    /// Start a spinner for a long-running operation. Returns `None` when the
    /// implementation has no live display.
    fn spinner(&self, _msg: &str) -> Option<ProgressBar> {
        None
    }
}

/// Sequential printer. The default for scripted/CI use.
pub struct Plain;

impl Reporter for Plain {
    fn step(&self, num: usize, total: usize, msg: &str) {
        println!(
            "{} {}",
            style(format!("[{}/{}]", num, total)).bold().cyan(),
            msg
        );
    }

    fn success(&self, msg: &str) {
        println!("{} {}", style("✓").bold().green(), msg);
    }

    fn error(&self, msg: &str) {
        eprintln!("{} {}", style("✗").bold().red(), msg);
    }

    fn warning(&self, msg: &str) {
        eprintln!("{} {}", style("!").bold().yellow(), msg);
    }

    fn info(&self, msg: &str) {
        println!("{} {}", style("→").bold().blue(), msg);
    }

    fn header(&self, msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }
}

/// Printer with steady-tick spinners for interactive terminals.
pub struct Live;

impl Reporter for Live {
    fn step(&self, num: usize, total: usize, msg: &str) {
        Plain.step(num, total, msg);
    }

    fn success(&self, msg: &str) {
        Plain.success(msg);
    }

    fn error(&self, msg: &str) {
        Plain.error(msg);
    }

    fn warning(&self, msg: &str) {
        Plain.warning(msg);
    }

    fn info(&self, msg: &str) {
        Plain.info(msg);
    }

    fn header(&self, msg: &str) {
        Plain.header(msg);
    }

    fn spinner(&self, msg: &str) -> Option<ProgressBar> {
        Some(create_spinner(msg))
    }
}

pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
