use crate::model::Field;

/// Cleans an OCR'd route description.
///
/// Headers sometimes repeat the route name before a `|`; only the text after
/// the last pipe is kept. Line breaks and tabs become single spaces so the
/// value stays on one TSV line.
pub fn normalize(raw: &str) -> Field<String> {
    let trimmed = raw.trim();
    let segment = match trimmed.rsplit_once('|') {
        Some((_, tail)) => tail.trim(),
        None => trimmed,
    };

    let collapsed = segment
        .split(['\n', '\r', '\t'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.is_empty() {
        Field::Undefined
    } else {
        Field::Defined(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_text_after_last_pipe() {
        assert_eq!(
            normalize("Route Name | Actual Description\n"),
            Field::Defined("Actual Description".to_string())
        );
        assert_eq!(
            normalize("A | B | Down Fast"),
            Field::Defined("Down Fast".to_string())
        );
    }

    #[test]
    fn collapses_line_breaks() {
        assert_eq!(
            normalize("  Kings Cross\nto\r\n Peterborough\t"),
            Field::Defined("Kings Cross to Peterborough".to_string())
        );
    }

    #[test]
    fn blank_text_is_undefined() {
        assert_eq!(normalize("   \n"), Field::Undefined);
        assert_eq!(normalize("Route Name |"), Field::Undefined);
    }
}
