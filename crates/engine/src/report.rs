//! Test report rendering.
//!
//! Turns an ordered step list plus run metadata into a PDF document and
//! the aggregate statistics stored with the run record.

use chrono::Utc;
use printpdf::{BuiltinFont, Color, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference, Rgb};
use uiproof_common::{is_error_token, is_success_token, Error, Result, RunStats, Step};

/// Run metadata printed on the report header
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub run_id: String,
    pub module: String,
    pub scenario: String,
    pub execution_time_seconds: f64,
}

/// Aggregate statistics over a finished step list.
///
/// Counting goes through the textual token sets so records written by the
/// legacy dashboard (French labels) aggregate the same way.
pub fn compute_stats(steps: &[Step]) -> RunStats {
    let total = steps.len();
    let success = steps
        .iter()
        .filter(|s| is_success_token(s.status.as_str()))
        .count();
    let error = steps
        .iter()
        .filter(|s| is_error_token(s.status.as_str()))
        .count();
    let warning = total - success - error;
    let success_rate = if total > 0 {
        success as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    RunStats {
        total,
        success,
        error,
        warning,
        success_rate,
    }
}

/// Filename for a generated report
pub fn report_filename() -> String {
    format!("report_{}.pdf", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Renders a report document from steps + metadata
pub trait ReportRenderer: Send + Sync {
    fn render(&self, meta: &ReportMeta, steps: &[Step]) -> Result<Vec<u8>>;
}

/// PDF renderer (A4, builtin Helvetica)
#[derive(Default)]
pub struct PdfRenderer;

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN: f32 = 20.0;

impl ReportRenderer for PdfRenderer {
    fn render(&self, meta: &ReportMeta, steps: &[Step]) -> Result<Vec<u8>> {
        let stats = compute_stats(steps);
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let (doc, page, layer) = PdfDocument::new(
            "Test Automation Report",
            Mm(PAGE_W),
            Mm(PAGE_H),
            "content",
        );
        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| Error::Render(e.to_string()))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| Error::Render(e.to_string()))?;

        let mut writer = PageWriter {
            doc: &doc,
            layer: doc.get_page(page).get_layer(layer),
            y: PAGE_H - 25.0,
        };

        writer.color(0.10, 0.21, 0.36);
        writer.line("TEST AUTOMATION REPORT", 20.0, &bold, 10.0);
        writer.color(0.18, 0.22, 0.28);

        writer.line("GENERAL INFORMATION", 13.0, &bold, 8.0);
        writer.line(&format!("Executed: {timestamp}"), 10.0, &font, 6.0);
        writer.line(
            &format!("Total duration: {:.2} seconds", meta.execution_time_seconds),
            10.0,
            &font,
            6.0,
        );
        writer.line(&format!("Module: {}", meta.module), 10.0, &font, 6.0);
        writer.line(&format!("Scenario: {}", meta.scenario), 10.0, &font, 6.0);
        writer.line(&format!("Run id: {}", meta.run_id), 10.0, &font, 6.0);
        writer.line(&format!("Steps: {}", stats.total), 10.0, &font, 10.0);

        writer.line("EXECUTIVE SUMMARY", 13.0, &bold, 8.0);
        if stats.success == stats.total && stats.total > 0 {
            writer.color(0.16, 0.65, 0.27);
            writer.line("FULL SUCCESS - every step passed", 11.0, &bold, 6.0);
        } else {
            writer.color(0.86, 0.21, 0.27);
            writer.line(
                &format!(
                    "PARTIAL RESULT - {} failure(s) over {} steps",
                    stats.error, stats.total
                ),
                11.0,
                &bold,
                6.0,
            );
        }
        writer.color(0.18, 0.22, 0.28);
        writer.line(
            &format!(
                "Success: {}   Failures: {}   Warnings: {}   Rate: {:.1}%",
                stats.success, stats.error, stats.warning, stats.success_rate
            ),
            10.0,
            &font,
            10.0,
        );

        writer.line("STEP DETAIL", 13.0, &bold, 8.0);
        for (i, step) in steps.iter().enumerate() {
            writer.line(&format!("STEP {}", i + 1), 11.0, &bold, 6.0);
            writer.line(
                &format!("Description: {}", step.description),
                9.0,
                &font,
                5.0,
            );
            if is_success_token(step.status.as_str()) {
                writer.color(0.16, 0.65, 0.27);
            } else if is_error_token(step.status.as_str()) {
                writer.color(0.86, 0.21, 0.27);
            } else {
                writer.color(1.0, 0.76, 0.03);
            }
            writer.line(&format!("Status: {}", step.status), 9.0, &bold, 5.0);
            writer.color(0.18, 0.22, 0.28);
            writer.line(&format!("Result: {}", step.result), 9.0, &font, 7.0);
        }

        writer.color(0.44, 0.50, 0.59);
        writer.line(
            &format!("Document generated automatically on {timestamp}"),
            8.0,
            &font,
            4.0,
        );
        writer.line("UiProof test automation", 8.0, &font, 4.0);

        doc.save_to_bytes().map_err(|e| Error::Render(e.to_string()))
    }
}

/// Cursor writing text lines top-down, breaking pages as needed
struct PageWriter<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
}

impl<'a> PageWriter<'a> {
    fn line(&mut self, text: &str, size: f32, font: &IndirectFontRef, advance: f32) {
        if self.y < MARGIN {
            let (page, layer) = self.doc.add_page(Mm(PAGE_W), Mm(PAGE_H), "content");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_H - 25.0;
        }
        self.layer.use_text(text, size, Mm(MARGIN), Mm(self.y), font);
        self.y -= advance;
    }

    fn color(&mut self, r: f32, g: f32, b: f32) {
        self.layer
            .set_fill_color(Color::Rgb(Rgb::new(r, g, b, None)));
    }
}
