use std::fmt;

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Trait for formatting CLI output
pub trait OutputFormatter {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    fn print_json(&self, value: &serde_json::Value);
}

/// Human-readable output formatter with checkmarks and indentation
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("\u{2713} {}", message);
    }
    fn error(&self, message: &str) {
        eprintln!("\u{2717} Error: {}", message);
    }
    fn warn(&self, message: &str) {
        eprintln!("\u{26a0} Warning: {}", message);
    }
    fn info(&self, message: &str) {
        println!("  {}", message);
    }
    fn print_json(&self, _value: &serde_json::Value) {
        // Human formatter doesn't print JSON
    }
}

/// JSON output formatter
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        println!(
            "{}",
            serde_json::json!({"success": true, "message": message})
        );
    }
    fn error(&self, message: &str) {
        eprintln!(
            "{}",
            serde_json::json!({"success": false, "error": message})
        );
    }
    fn warn(&self, message: &str) {
        eprintln!(
            "{}",
            serde_json::json!({"level": "warning", "message": message})
        );
    }
    fn info(&self, _message: &str) {}
    fn print_json(&self, value: &serde_json::Value) {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_default()
        );
    }
}

/// Keeps warnings, errors and JSON documents; drops everything else
pub struct Quiet<F>(pub F);

impl<F: OutputFormatter> OutputFormatter for Quiet<F> {
    fn success(&self, _message: &str) {}
    fn error(&self, message: &str) {
        self.0.error(message);
    }
    fn warn(&self, message: &str) {
        self.0.warn(message);
    }
    fn info(&self, _message: &str) {}
    fn print_json(&self, value: &serde_json::Value) {
        self.0.print_json(value);
    }
}

impl OutputFormat {
    /// The formatter for this format, wrapped in [`Quiet`] when asked
    pub fn formatter(self, quiet: bool) -> Box<dyn OutputFormatter> {
        match (self, quiet) {
            (OutputFormat::Json, false) => Box::new(JsonFormatter),
            (OutputFormat::Json, true) => Box::new(Quiet(JsonFormatter)),
            (OutputFormat::Human, false) => Box::new(HumanFormatter),
            (OutputFormat::Human, true) => Box::new(Quiet(HumanFormatter)),
        }
    }
}

/// A count and its noun: "1 file", "3 files"
#[derive(Debug, Clone, Copy)]
pub struct Counted<'a> {
    count: usize,
    one: &'a str,
    many: Option<&'a str>,
}

impl<'a> Counted<'a> {
    /// Pluralizes by appending `s`
    pub fn new(count: usize, noun: &'a str) -> Self {
        Self {
            count,
            one: noun,
            many: None,
        }
    }

    /// Uses `many` instead of the regular plural
    pub fn plural(mut self, many: &'a str) -> Self {
        self.many = Some(many);
        self
    }
}

impl fmt::Display for Counted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.count, self.many) {
            (1, _) => write!(f, "1 {}", self.one),
            (n, Some(many)) => write!(f, "{n} {many}"),
            (n, None) => write!(f, "{n} {}s", self.one),
        }
    }
}
