use std::io::Write;
use std::time::Duration;

use examprep_core::{ExtractedDocument, Panel};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print a result panel: a bold title with an underline, then the body.
/// Warnings are printed in yellow with no title.
pub fn print_panel(w: &mut dyn Write, panel: &Panel, color: ColorMode) -> std::io::Result<()> {
    match panel {
        Panel::Content { title, body } => {
            if color.enabled() {
                writeln!(w, "{}", title.bold())?;
            } else {
                writeln!(w, "{}", title)?;
            }
            writeln!(w, "{}", "=".repeat(title.chars().count()))?;
            writeln!(w, "{}", body.trim_end())?;
        }
        Panel::Warning(message) => {
            if color.enabled() {
                writeln!(w, "{}", message.yellow())?;
            } else {
                writeln!(w, "{}", message)?;
            }
        }
    }
    writeln!(w)?;
    Ok(())
}

/// One dimmed line describing the loaded document.
pub fn print_document_info(
    w: &mut dyn Write,
    name: &str,
    doc: &ExtractedDocument,
    color: ColorMode,
) -> std::io::Result<()> {
    let line = format!(
        "{}: {} page{}, {} characters via {}{} [{}]",
        name,
        doc.page_count,
        if doc.page_count == 1 { "" } else { "s" },
        doc.text.chars().count(),
        doc.backend,
        if doc.ocr_applied { " + OCR" } else { "" },
        doc.fingerprint.short()
    );
    if color.enabled() {
        writeln!(w, "{}", line.dimmed())
    } else {
        writeln!(w, "{}", line)
    }
}

/// Spinner on stderr while a slow step runs. Hidden when `enabled` is false.
pub fn spinner(message: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bar = ProgressBar::new_spinner();
    bar.set_style(style);
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(panel: &Panel) -> String {
        let mut out = Vec::new();
        print_panel(&mut out, panel, ColorMode(false)).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn content_panel_has_underlined_title() {
        let out = render(&Panel::Content {
            title: "Study Notes".into(),
            body: "- ATP is energy\n".into(),
        });
        assert_eq!(out, "Study Notes\n===========\n- ATP is energy\n\n");
    }

    #[test]
    fn warning_panel_is_message_only() {
        let out = render(&Panel::Warning("⚠️ rate limit reached".into()));
        assert_eq!(out, "⚠️ rate limit reached\n\n");
    }
}
