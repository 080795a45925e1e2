// Output formatting helpers for CLI commands
//
// Progress goes to stderr, step output and reports to stdout. Colors are
// dropped when NO_COLOR is set.

use std::sync::OnceLock;

fn colors_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os("NO_COLOR").map_or(true, |v| v.is_empty()))
}

/// Wrap `text` in an ANSI style unless colors are disabled
fn paint(style: &str, text: &str) -> String {
    if colors_enabled() {
        format!("\x1b[{}m{}\x1b[0m", style, text)
    } else {
        text.to_string()
    }
}

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("{} {}", paint("1;36", &format!("{:>12}", action)), message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("{} {}", paint("1;32", "  \u{2713}"), message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("{} {}", paint("1;31", "  \u{2717}"), message);
}

/// Print a check/pass item
pub fn check(message: &str) {
    eprintln!("{} {}", paint("32", "  \u{2713}"), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", paint("33", "  !"), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", paint("1;31", "error:"), message);
}

pub fn info(message: &str) {
    eprintln!("{} {}", paint("36", "  i"), message);
}

pub fn dim(message: &str) {
    eprintln!("{}", paint("2", message));
}

pub fn dim_success(message: &str) {
    eprintln!("{}", paint("32", message));
}

pub fn dim_failure(message: &str) {
    eprintln!("{}", paint("31", message));
}

/// Print a job header with its instance count
pub fn job_header(job_id: &str, instances: usize) {
    eprintln!("{} '{}' ({} instances)", paint("1;34", "  Job"), job_id, instances);
}

/// Print step output (indented)
pub fn step_output(line: &str) {
    println!("        | {}", line);
}

/// Print step error output (indented, red)
pub fn step_error(line: &str) {
    eprintln!("{}", paint("31", &format!("        | {}", line)));
}

pub fn header(message: &str) {
    eprintln!("{}", paint("1", &format!("==> {}", message)));
}
