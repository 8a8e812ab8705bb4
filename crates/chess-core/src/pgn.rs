//! Movetext helpers: pull SAN out of PGN text and lay a SAN list out as
//! numbered move rows.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use shakmaty::{Chess, Color, Position};

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\]]*\]").expect("header regex"));
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^}]*\}").expect("comment regex"));
static VARIATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("variation regex"));
static MOVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[KQRBN]?[a-h]?[1-8]?x?[a-h][1-8](?:=[QRBN])?[+#]?|O-O-O[+#]?|O-O[+#]?").expect("move regex")
});

/// One row of a move list: a move number with up to two half-moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRow {
    pub number: u32,
    pub white: Option<String>,
    pub black: Option<String>,
}

/// Extract SAN moves from PGN text, skipping headers, comments and variations.
pub fn extract_san_moves(pgn: &str) -> Vec<String> {
    let no_headers = HEADER_RE.replace_all(pgn, "");
    let no_comments = COMMENT_RE.replace_all(&no_headers, "");
    let no_variations = VARIATION_RE.replace_all(&no_comments, "");

    MOVE_RE
        .find_iter(&no_variations)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Extract a string value from a PGN header such as `FEN`.
pub fn extract_header(pgn: &str, header_name: &str) -> Option<String> {
    let pattern = format!(r#"\[{}\s+"([^"]*)"\]"#, regex::escape(header_name));
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(pgn)?.get(1)?.as_str().to_string();
    if value.is_empty() { None } else { Some(value) }
}

/// Group SANs into numbered rows. A line that starts with Black to move gets
/// a first row with an empty white slot.
pub fn move_rows(sans: &[String], first_turn: Color, first_fullmove: u32) -> Vec<MoveRow> {
    let mut rows: Vec<MoveRow> = Vec::new();
    let mut number = first_fullmove.max(1);
    let mut turn = first_turn;

    for san in sans {
        match turn {
            Color::White => rows.push(MoveRow {
                number,
                white: Some(san.clone()),
                black: None,
            }),
            Color::Black => match rows.last_mut() {
                Some(row) if row.number == number && row.black.is_none() => row.black = Some(san.clone()),
                _ => rows.push(MoveRow {
                    number,
                    white: None,
                    black: Some(san.clone()),
                }),
            },
        }
        if turn == Color::Black {
            number += 1;
        }
        turn = !turn;
    }
    rows
}

/// Render SANs as PGN movetext, e.g. `1. e4 e5 2. Nf3` or `7... Qh4#`.
pub fn format_movetext(sans: &[String], first_turn: Color, first_fullmove: u32) -> String {
    let mut parts = Vec::with_capacity(sans.len() * 2);
    for row in move_rows(sans, first_turn, first_fullmove) {
        match (row.white, row.black) {
            (Some(w), Some(b)) => parts.push(format!("{}. {} {}", row.number, w, b)),
            (Some(w), None) => parts.push(format!("{}. {}", row.number, w)),
            (None, Some(b)) => parts.push(format!("{}... {}", row.number, b)),
            (None, None) => {}
        }
    }
    parts.join(" ")
}

/// Movetext for a line that starts at `start`.
pub fn format_movetext_for(start: &Chess, sans: &[String]) -> String {
    format_movetext(sans, start.turn(), start.fullmoves().get())
}
