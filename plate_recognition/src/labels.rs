use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Loads the character class table: one glyph per line, line number is the
/// model's class id.
pub fn load_character_labels(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    parse_labels(io::BufReader::new(file))
}

fn parse_labels<R: BufRead>(reader: R) -> io::Result<Vec<String>> {
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.trim();
        if label.is_empty() {
            continue;
        }
        labels.push(label.to_string());
    }

    if labels.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "labels file contains no classes",
        ));
    }

    Ok(labels)
}
