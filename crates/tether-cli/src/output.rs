//! Colored terminal output for CLI commands.
//!
//! Respects the `NO_COLOR` environment variable and the `--color` flag.

use std::io::Write;
use tether_runtime::ScriptValue;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` from CLI flag and environment.
///
/// Priority: `NO_COLOR` env > `--color` flag > auto-detect TTY.
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

pub struct StyledOutput {
    stdout: StandardStream,
    stderr: StandardStream,
}

impl StyledOutput {
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
            stderr: StandardStream::stderr(choice),
        }
    }

    fn write_styled(stream: &mut StandardStream, text: &str, color: Option<Color>, bold: bool) {
        let mut spec = ColorSpec::new();
        spec.set_fg(color).set_bold(bold);
        let _ = stream.set_color(&spec);
        let _ = write!(stream, "{}", text);
        let _ = stream.reset();
    }

    /// Print a script result. `undefined` prints nothing.
    pub fn value(&mut self, value: &ScriptValue) {
        let color = match value {
            ScriptValue::Undefined => return,
            ScriptValue::String(_) => Some(Color::Green),
            ScriptValue::Int(_) | ScriptValue::Float(_) => Some(Color::Yellow),
            ScriptValue::Bool(_) | ScriptValue::Null => Some(Color::Magenta),
            ScriptValue::Json(_) => None,
            ScriptValue::Opaque(_) => Some(Color::Cyan),
        };
        Self::write_styled(&mut self.stdout, &value.to_string(), color, false);
        let _ = writeln!(self.stdout);
    }

    /// A message a script sent to the host.
    pub fn message(&mut self, text: &str) {
        Self::write_styled(&mut self.stdout, "message", Some(Color::Cyan), true);
        let _ = writeln!(self.stdout, ": {}", text);
    }

    /// A failure report, on stderr.
    pub fn failure(&mut self, text: &str) {
        Self::write_styled(&mut self.stderr, "error", Some(Color::Red), true);
        let _ = writeln!(self.stderr, ": {}", text);
    }

    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
        let _ = self.stderr.flush();
    }
}
