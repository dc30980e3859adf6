use printpdf::*;
use std::io::BufWriter;

use crate::{batch::BatchState, sink::SinkError};

const SEPARATOR: &str = "\n\n---\n\n";
const WRAP_AT: usize = 95;
const TOP: f32 = 275.0;
const BOTTOM: f32 = 20.0;
const LINE: f32 = 5.0;

/// Successful slots in index order, joined by a horizontal-rule separator.
pub fn batch_text(state: &BatchState) -> String {
    state.successful().map(|(_, p)| p.export_text()).collect::<Vec<_>>().join(SEPARATOR)
}

/// Text-only PDF of the successful slots. Images are listed, not embedded.
pub fn batch_pdf(state: &BatchState) -> Result<Vec<u8>, SinkError> {
    let title = state.tool.title();
    let (doc, page, layer) = PdfDocument::new(title, Mm(210.0), Mm(297.0), "Layer 1");
    let font = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_err)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_err)?;

    let mut layer_ref = doc.get_page(page).get_layer(layer);
    layer_ref.use_text(title, 20.0, Mm(15.0), Mm(TOP), &bold);
    let mut y = TOP - 15.0;

    for (index, payload) in state.successful() {
        let mut lines = vec![String::new()];
        for paragraph in payload.export_text().lines() {
            lines.extend(wrap(paragraph, WRAP_AT));
        }
        for (n, line) in lines.iter().enumerate() {
            if y < BOTTOM {
                let (page, layer) = doc.add_page(Mm(210.0), Mm(297.0), format!("Resultado {}", index + 1));
                layer_ref = doc.get_page(page).get_layer(layer);
                y = TOP;
            }
            if n == 0 {
                layer_ref.use_text(format!("Resultado {}", index + 1), 13.0, Mm(15.0), Mm(y), &bold);
                y -= LINE + 2.0;
            } else {
                layer_ref.use_text(line.as_str(), 10.0, Mm(15.0), Mm(y), &font);
                y -= LINE;
            }
        }
        y -= LINE;
    }

    let mut buf: Vec<u8> = Vec::new();
    {
        let mut writer = BufWriter::new(&mut buf);
        doc.save(&mut writer).map_err(pdf_err)?;
    }
    Ok(buf)
}

fn pdf_err(e: impl std::fmt::Display) -> SinkError {
    SinkError::Export(e.to_string())
}

/// Greedy word wrap on character counts.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = current.chars().count() + word.chars().count() + usize::from(!current.is_empty());
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}
