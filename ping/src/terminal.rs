use std::io::IsTerminal;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// ANSI escapes, or empty strings when colors are off.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    /// Colors are only used on a terminal, and never with `--no-color`.
    pub fn new(no_color: bool) -> Self {
        Self {
            enabled: !no_color && std::io::stdout().is_terminal(),
        }
    }

    pub fn green(&self) -> &'static str {
        if self.enabled {
            GREEN
        } else {
            ""
        }
    }

    pub fn red(&self) -> &'static str {
        if self.enabled {
            RED
        } else {
            ""
        }
    }

    pub fn reset(&self) -> &'static str {
        if self.enabled {
            RESET
        } else {
            ""
        }
    }
}

pub fn timestamp() -> String {
    chrono::Local::now()
        .format("[%Y-%m-%d %H:%M:%S%.3f] ")
        .to_string()
}
