//! Post-game review: the server's per-move analysis of a finished game and
//! the quality marks shown next to each ply.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Quality mark the analysis attaches to a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Brilliant,
    Great,
    Inaccuracy,
    Mistake,
    Blunder,
}

impl Severity {
    /// Display order, best to worst.
    pub const ALL: [Severity; 5] = [
        Severity::Brilliant,
        Severity::Great,
        Severity::Inaccuracy,
        Severity::Mistake,
        Severity::Blunder,
    ];

    /// Annotation glyph used next to the move.
    pub fn symbol(self) -> &'static str {
        match self {
            Severity::Brilliant => "!!",
            Severity::Great => "!",
            Severity::Inaccuracy => "?!",
            Severity::Mistake => "?",
            Severity::Blunder => "??",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Brilliant => "brilliant",
            Severity::Great => "great",
            Severity::Inaccuracy => "inaccuracy",
            Severity::Mistake => "mistake",
            Severity::Blunder => "blunder",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown severity: {s}"))
    }
}

/// Unknown or missing marks read as unmarked rather than failing the whole
/// analysis.
fn lenient_severity<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Severity>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

/// Server analysis of one half-move.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MoveAnalysis {
    pub id: Option<i64>,
    /// The move as played, in UCI or SAN.
    #[serde(rename = "move")]
    pub mv: String,
    pub side: Option<String>,
    #[serde(deserialize_with = "lenient_severity")]
    pub severity: Option<Severity>,
    pub fen_before: Option<String>,
    pub fen_after: Option<String>,
    pub eval_before_cp: Option<i32>,
    pub eval_after_cp: Option<i32>,
    pub best_response: Option<String>,
    pub pv: Vec<String>,
    pub engine_comment: Option<String>,
    pub llm_short: Option<String>,
    pub llm_hint: Option<String>,
}

impl MoveAnalysis {
    /// Short human comment: the written summary when there is one, else the
    /// engine's.
    pub fn comment(&self) -> Option<&str> {
        [self.llm_short.as_deref(), self.engine_comment.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct GamePlayers {
    pub white: Option<String>,
    pub black: Option<String>,
}

/// Response of the game-analysis endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameAnalysis {
    pub analyses: Vec<MoveAnalysis>,
    pub game: Option<GamePlayers>,
    pub initial_fen: Option<String>,
}

impl GameAnalysis {
    /// Position the line starts from: the explicit initial FEN, else the
    /// position before the first analysed move. `None` means the standard
    /// start.
    pub fn base_fen(&self) -> Option<&str> {
        self.initial_fen
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .or_else(|| self.analyses.first().and_then(|a| a.fen_before.as_deref()))
            .filter(|f| !f.trim().is_empty())
    }

    /// The analysed moves in play order.
    pub fn tokens(&self) -> Vec<String> {
        self.analyses.iter().map(|a| a.mv.clone()).collect()
    }
}

/// How many moves of each quality a game contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub brilliant: usize,
    pub great: usize,
    pub inaccuracy: usize,
    pub mistake: usize,
    pub blunder: usize,
}

impl SeverityCounts {
    fn slot(&mut self, severity: Severity) -> &mut usize {
        match severity {
            Severity::Brilliant => &mut self.brilliant,
            Severity::Great => &mut self.great,
            Severity::Inaccuracy => &mut self.inaccuracy,
            Severity::Mistake => &mut self.mistake,
            Severity::Blunder => &mut self.blunder,
        }
    }

    pub fn add(&mut self, severity: Severity) {
        *self.slot(severity) += 1;
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Brilliant => self.brilliant,
            Severity::Great => self.great,
            Severity::Inaccuracy => self.inaccuracy,
            Severity::Mistake => self.mistake,
            Severity::Blunder => self.blunder,
        }
    }

    pub fn total(&self) -> usize {
        Severity::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

/// A loaded review: analysis entries lined up with timeline plies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSheet {
    code: String,
    entries: Vec<MoveAnalysis>,
    players: GamePlayers,
    counts: SeverityCounts,
}

impl ReviewSheet {
    /// `imported` is how many of the analysed moves made it onto the
    /// timeline; only those plies carry marks.
    pub fn new(code: &str, analysis: GameAnalysis, imported: usize) -> Self {
        let mut counts = SeverityCounts::default();
        for sev in analysis.analyses.iter().filter_map(|a| a.severity) {
            counts.add(sev);
        }
        let mut entries = analysis.analyses;
        entries.truncate(imported);
        Self {
            code: code.to_string(),
            entries,
            players: analysis.game.unwrap_or_default(),
            counts,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Analysis of the move that led to `ply`. Ply 0 has none.
    pub fn entry_at(&self, ply: usize) -> Option<&MoveAnalysis> {
        ply.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn severity_at(&self, ply: usize) -> Option<Severity> {
        self.entry_at(ply).and_then(|e| e.severity)
    }

    /// Marks for every imported ply, in order.
    pub fn marks(&self) -> Vec<Option<Severity>> {
        self.entries.iter().map(|e| e.severity).collect()
    }

    pub fn counts(&self) -> SeverityCounts {
        self.counts
    }

    pub fn players(&self) -> &GamePlayers {
        &self.players
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "initialFen": null,
        "game": {"white": "alice", "black": "bot"},
        "analyses": [
            {"id": 1, "move": "e2e4", "severity": "great", "side": "white",
             "fenBefore": "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
             "evalBeforeCp": 20, "evalAfterCp": 35, "llmShort": "Claims the centre.", "llmTags": ["opening"]},
            {"id": 2, "move": "f7f6", "severity": "mistake", "engineComment": "Weakens the king."},
            {"id": 3, "move": "d1h5", "severity": "brilliant"},
            {"id": 4, "move": "g7g6", "severity": "blunder"},
            {"id": 5, "move": "h5g6", "severity": "sparkly"}
        ]
    }"#;

    #[test]
    fn test_analysis_body_parses() {
        let analysis: GameAnalysis = serde_json::from_str(BODY).unwrap();
        assert_eq!(analysis.analyses.len(), 5);
        assert_eq!(
            analysis.base_fen(),
            Some("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1")
        );
        assert_eq!(analysis.tokens()[2], "d1h5");
        assert_eq!(analysis.analyses[0].eval_after_cp, Some(35));
        assert_eq!(analysis.analyses[0].comment(), Some("Claims the centre."));
        assert_eq!(analysis.analyses[1].comment(), Some("Weakens the king."));
        assert_eq!(analysis.analyses[4].severity, None);
    }

    #[test]
    fn test_initial_fen_wins_over_first_move() {
        let analysis: GameAnalysis = serde_json::from_str(
            r#"{"initialFen": "4k3/8/8/8/8/8/8/4K3 w - - 0 1",
                "analyses": [{"move": "e1e2", "fenBefore": "8/8/8/8/8/8/8/K6k w - - 0 1"}]}"#,
        )
        .unwrap();
        assert_eq!(analysis.base_fen(), Some("4k3/8/8/8/8/8/8/4K3 w - - 0 1"));

        let empty: GameAnalysis = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.base_fen(), None);
        assert!(empty.tokens().is_empty());
    }

    #[test]
    fn test_sheet_marks_and_counts() {
        let analysis: GameAnalysis = serde_json::from_str(BODY).unwrap();
        let sheet = ReviewSheet::new("AB12CD", analysis, 3);

        assert_eq!(sheet.severity_at(0), None);
        assert_eq!(sheet.severity_at(1), Some(Severity::Great));
        assert_eq!(sheet.severity_at(3), Some(Severity::Brilliant));
        // Not imported, so no mark on the board.
        assert_eq!(sheet.severity_at(4), None);
        assert_eq!(sheet.marks().len(), 3);

        // Counts cover the whole analysis.
        let counts = sheet.counts();
        assert_eq!(counts.get(Severity::Blunder), 1);
        assert_eq!(counts.get(Severity::Inaccuracy), 0);
        assert_eq!(counts.total(), 4);
        assert_eq!(sheet.players().white.as_deref(), Some("alice"));
    }

    #[test]
    fn test_severity_text() {
        assert_eq!("Blunder".parse::<Severity>(), Ok(Severity::Blunder));
        assert!("best".parse::<Severity>().is_err());
        assert_eq!(Severity::Inaccuracy.symbol(), "?!");
        assert_eq!(Severity::Great.to_string(), "great");
    }
}
