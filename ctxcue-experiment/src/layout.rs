//! Loading of pre-generated search layouts.
//!
//! Each row holds the target cell as `(x, y)` and the distractors as a list
//! of `((x, y), 'tag')` tuples, as written by the layout generator.

use crate::error::LayoutError;
use ctxcue_core::{Corner, GridCell, TargetShape, TrialLayout};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawLayoutRow {
    context_id: String,
    is_old: String,
    target_pos: String,
    distractors: String,
    target_shape: String,
}

pub fn load_layouts<P: AsRef<Path>>(path: P) -> Result<Vec<TrialLayout>, LayoutError> {
    let path = path.as_ref();
    let reader = csv::Reader::from_path(path).map_err(|cause| LayoutError::Read {
        path: path.to_path_buf(),
        cause,
    })?;
    let layouts = parse_rows(reader)?;
    if layouts.is_empty() {
        return Err(LayoutError::Empty {
            path: path.to_path_buf(),
        });
    }
    tracing::info!(
        path = %path.display(),
        trials = layouts.len(),
        old = layouts.iter().filter(|l| l.is_old).count(),
        "loaded trial layouts"
    );
    Ok(layouts)
}

/// Parse layouts from any CSV source. Stops at the first malformed row.
pub fn parse_rows<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<TrialLayout>, LayoutError> {
    let mut layouts = Vec::new();
    for (idx, record) in reader.deserialize::<RawLayoutRow>().enumerate() {
        // Row numbers count the header as row 1.
        let row = idx + 2;
        let raw = record.map_err(|e| LayoutError::MalformedRow {
            row,
            message: e.to_string(),
        })?;
        layouts.push(convert(raw).map_err(|message| LayoutError::MalformedRow { row, message })?);
    }
    Ok(layouts)
}

fn convert(raw: RawLayoutRow) -> Result<TrialLayout, String> {
    let context_id = raw.context_id.trim().to_string();
    if context_id.is_empty() {
        return Err("empty context_id".into());
    }
    let is_old = parse_bool(&raw.is_old)?;
    let target = match tokenize(&raw.target_pos)?.as_slice() {
        [Token::Int(x), Token::Int(y)] => GridCell::new(*x, *y),
        _ => return Err(format!("target_pos '{}' is not an (x, y) pair", raw.target_pos)),
    };
    let target_shape = raw.target_shape.parse::<TargetShape>()?;

    let tokens = tokenize(&raw.distractors)?;
    if tokens.len() % 3 != 0 {
        return Err(format!(
            "distractors '{}' are not ((x, y), 'tag') tuples",
            raw.distractors
        ));
    }
    let distractors = tokens
        .chunks(3)
        .map(|chunk| match chunk {
            [Token::Int(x), Token::Int(y), Token::Tag(tag)] => {
                Ok((GridCell::new(*x, *y), tag.parse::<Corner>()?))
            }
            _ => Err(format!(
                "distractors '{}' are not ((x, y), 'tag') tuples",
                raw.distractors
            )),
        })
        .collect::<Result<Vec<_>, String>>()?;

    if distractors.iter().any(|(cell, _)| *cell == target) {
        return Err(format!("distractor overlaps target at {:?}", target));
    }

    Ok(TrialLayout {
        context_id,
        is_old,
        target,
        target_shape,
        distractors,
    })
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim() {
        "True" | "true" | "1" => Ok(true),
        "False" | "false" | "0" => Ok(false),
        other => Err(format!("is_old '{other}' is not a boolean")),
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Int(u32),
    Tag(String),
}

/// Flatten a tuple/list literal into its integers and quoted tags, in order.
fn tokenize(s: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '(' | ')' | '[' | ']' | ',' | ' ' | '\t' => {
                chars.next();
            }
            '0'..='9' => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let value = digits
                    .parse::<u32>()
                    .map_err(|e| format!("bad coordinate '{digits}': {e}"))?;
                tokens.push(Token::Int(value));
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut tag = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => tag.push(ch),
                        None => return Err(format!("unterminated string in '{s}'")),
                    }
                }
                tokens.push(Token::Tag(tag));
            }
            other => return Err(format!("unexpected character '{other}' in '{s}'")),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "context_id,is_old,target_pos,distractors,target_shape\n";

    fn parse(body: &str) -> Result<Vec<TrialLayout>, LayoutError> {
        let data = format!("{HEADER}{body}");
        parse_rows(csv::Reader::from_reader(data.as_bytes()))
    }

    #[test]
    fn parses_python_literals() {
        let layouts = parse(
            "3,True,\"(4, 5)\",\"[((1, 2), 'ul'), ((7, 0), 'dr')]\",T_left\n\
             17,False,\"(0, 0)\",\"[((2, 2), 'ur')]\",T_right\n",
        )
        .unwrap();
        assert_eq!(layouts.len(), 2);
        let first = &layouts[0];
        assert_eq!(first.context_id, "3");
        assert!(first.is_old);
        assert_eq!(first.target, GridCell::new(4, 5));
        assert_eq!(first.target_shape, TargetShape::Left);
        assert_eq!(
            first.distractors,
            vec![
                (GridCell::new(1, 2), Corner::UpLeft),
                (GridCell::new(7, 0), Corner::DownRight)
            ]
        );
        assert_eq!(layouts[1].condition(), "new");
    }

    #[test]
    fn malformed_row_reports_row_number() {
        let err = parse(
            "1,True,\"(4, 5)\",\"[((1, 2), 'ul')]\",T_left\n\
             2,maybe,\"(4, 5)\",\"[((1, 2), 'ul')]\",T_left\n",
        )
        .unwrap_err();
        match err {
            LayoutError::MalformedRow { row, message } => {
                assert_eq!(row, 3);
                assert!(message.contains("maybe"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_tuples_and_tags() {
        assert!(parse("1,True,\"(4)\",\"[]\",T_left\n").is_err());
        assert!(parse("1,True,\"(4, 5)\",\"[((1, 2))]\",T_left\n").is_err());
        assert!(parse("1,True,\"(4, 5)\",\"[((1, 2), 'zz')]\",T_left\n").is_err());
        assert!(parse("1,True,\"(4, 5)\",\"[((1, 2), 'ul'\",T_up\n").is_err());
        assert!(parse("1,True,\"(-4, 5)\",\"[]\",T_left\n").is_err());
    }

    #[test]
    fn rejects_overlap_with_target() {
        assert!(parse("1,True,\"(4, 5)\",\"[((4, 5), 'ul')]\",T_left\n").is_err());
    }

    #[test]
    fn missing_column_is_fatal() {
        let data = "context_id,is_old,target_pos\n1,True,\"(1, 1)\"\n";
        assert!(matches!(
            parse_rows(csv::Reader::from_reader(data.as_bytes())),
            Err(LayoutError::MalformedRow { row: 2, .. })
        ));
    }

    #[test]
    fn empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trials.csv");
        std::fs::write(&path, HEADER).unwrap();
        assert!(matches!(load_layouts(&path), Err(LayoutError::Empty { .. })));
        assert!(matches!(
            load_layouts(dir.path().join("missing.csv")),
            Err(LayoutError::Read { .. })
        ));
    }
}
