//! The persisted key-layout format: `from,to` pairs separated by `;`, with
//! no trailing separator. The reserved default is the identity mapping over
//! the gamepad button range (306 is not a gamepad key and is skipped).

use ::std::collections::HashMap;
use ::std::fmt;
use ::std::fs;
use ::std::io;
use ::std::path::Path;

pub const LAYOUT_FILE_NAME: &str = "layout.txt";

const DEFAULT_CODES: [u32; 14] =
    [304, 305, 307, 308, 309, 310, 311, 312, 313, 314, 315, 316, 317, 318];

#[derive(Debug)]
pub enum LayoutError {
    Io(io::Error),
    Parse(String),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LayoutError::Io(e) => write!(f, "layout file i/o error: {}", e),
            LayoutError::Parse(seg) => write!(f, "malformed layout entry {:?}", seg),
        }
    }
}

impl ::std::error::Error for LayoutError {}

impl From<io::Error> for LayoutError {
    fn from(e: io::Error) -> Self {
        LayoutError::Io(e)
    }
}

pub fn default_layout() -> HashMap<u32, u32> {
    DEFAULT_CODES.iter().map(|&c| (c, c)).collect()
}

/// Parse the `from,to;from,to` text form. A trailing separator is tolerated
/// on input; it is never produced on output.
pub fn parse_layout(text: &str) -> Result<HashMap<u32, u32>, LayoutError> {
    let mut layout = HashMap::new();
    for seg in text.trim().split(';') {
        let seg = seg.trim();
        if seg.is_empty() {
            continue;
        }
        let mut it = seg.splitn(2, ',');
        let from = it.next().unwrap_or("").trim();
        let to = it.next().unwrap_or("").trim();
        match (from.parse::<u32>(), to.parse::<u32>()) {
            (Ok(f), Ok(t)) => {
                layout.insert(f, t);
            }
            _ => return Err(LayoutError::Parse(seg.to_owned())),
        }
    }
    Ok(layout)
}

pub fn format_layout(layout: &HashMap<u32, u32>) -> String {
    let mut pairs: Vec<_> = layout.iter().collect();
    pairs.sort_unstable();
    pairs
        .iter()
        .map(|(f, t)| format!("{},{}", f, t))
        .collect::<Vec<_>>()
        .join(";")
}

/// Load the layout file from `dir`, creating the directory and writing the
/// default layout on first run.
pub fn load_or_init_layout(dir: &Path) -> Result<HashMap<u32, u32>, LayoutError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(LAYOUT_FILE_NAME);
    match fs::read_to_string(&path) {
        Ok(text) => parse_layout(&text),
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
            let layout = default_layout();
            fs::write(&path, format_layout(&layout))?;
            Ok(layout)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_identity_without_306() {
        let layout = default_layout();
        assert_eq!(layout.len(), 14);
        assert!(!layout.contains_key(&306));
        for (&from, &to) in &layout {
            assert_eq!(from, to);
            assert!((304..=318).contains(&from));
        }
    }

    #[test]
    fn round_trip_preserves_pairs() {
        let mut layout = HashMap::new();
        layout.insert(304, 310);
        layout.insert(310, 304);
        layout.insert(318, 318);
        assert_eq!(parse_layout(&format_layout(&layout)).unwrap(), layout);
    }

    #[test]
    fn formatted_form_has_no_trailing_separator() {
        let text = format_layout(&default_layout());
        assert!(!text.ends_with(';'));
        assert!(!text.contains('\0'));
    }

    #[test]
    fn parse_tolerates_trailing_separator() {
        let layout = parse_layout("304,310;305,305;").unwrap();
        assert_eq!(layout.get(&304), Some(&310));
        assert_eq!(layout.len(), 2);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_layout("304").is_err());
        assert!(parse_layout("a,b").is_err());
        assert!(parse_layout("304,").is_err());
    }

    #[test]
    fn load_writes_default_on_first_run() {
        let dir = ::std::env::temp_dir().join(format!("joycond-layout-test-{}", ::std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let layout = load_or_init_layout(&dir).unwrap();
        assert_eq!(layout, default_layout());
        // second load reads the file back
        assert_eq!(load_or_init_layout(&dir).unwrap(), default_layout());
        let _ = fs::remove_dir_all(&dir);
    }
}
