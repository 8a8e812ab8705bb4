//! Plain-text rendering of session updates.

use std::fmt::Write;

use chess_core::{GameStatus, MoveApplier, StandardRules};
use chess_session::{ConnectionStatus, Outcome, PlayerSide, SessionEvent, SessionSnapshot, Severity};
use shakmaty::{File, Position, Rank, Square};

/// ASCII board, White at the bottom unless the player has Black. The last
/// move's squares are bracketed.
pub fn board(snapshot: &SessionSnapshot) -> String {
    let pos = match StandardRules.parse_fen(&snapshot.fen) {
        Ok(pos) => pos,
        Err(e) => return format!("(unreadable position: {e})\n"),
    };
    let flipped = snapshot.side == PlayerSide::Black;
    let ranks: Vec<u32> = if flipped { (0..8).collect() } else { (0..8).rev().collect() };
    let files: Vec<u32> = if flipped { (0..8).rev().collect() } else { (0..8).collect() };

    let mut out = String::new();
    for &r in &ranks {
        let _ = write!(out, "{} ", r + 1);
        for &f in &files {
            let sq = Square::from_coords(File::new(f), Rank::new(r));
            let glyph = pos.board().piece_at(sq).map(|p| p.char()).unwrap_or('.');
            let marked = snapshot.last_move.is_some_and(|(from, to)| sq == from || sq == to);
            if marked {
                let _ = write!(out, "[{glyph}]");
            } else {
                let _ = write!(out, " {glyph} ");
            }
        }
        out.push('\n');
    }
    out.push_str("  ");
    for &f in &files {
        let _ = write!(out, " {} ", File::new(f).char());
    }
    out.push('\n');
    out
}

pub fn status_line(snapshot: &SessionSnapshot) -> String {
    let mut line = format!(
        "{:?} | {:?} | you: {} | ply {}/{}",
        snapshot.mode,
        snapshot.phase,
        side_name(snapshot.side),
        snapshot.cursor,
        snapshot.len
    );
    if snapshot.connection != ConnectionStatus::Idle {
        let _ = write!(line, " | link: {:?}", snapshot.connection);
    }
    if let Some((from, to)) = snapshot.premove {
        let _ = write!(line, " | premove {from}{to}");
    }
    if let Some((from, to)) = snapshot.pending_promotion {
        let _ = write!(line, " | promote {from}{to}? (promote q|r|b|n)");
    }
    if let Some((solved, total)) = snapshot.puzzle_progress {
        let _ = write!(line, " | puzzle {solved}/{total}");
        if snapshot.puzzle_locked {
            line.push_str(" (locked, 'ack' to retry)");
        }
    }
    if let Some(rating) = snapshot.rating {
        let _ = write!(line, " | rating {rating}");
        if let Some(change) = snapshot.rating_change {
            let _ = write!(line, " ({change:+})");
        }
    }
    if let Some(king) = snapshot.checked_king {
        let _ = write!(line, " | check on {king}");
    }
    if let Some(mark) = snapshot.current_mark {
        let _ = write!(line, " | {} {mark}", mark.symbol());
    }
    if snapshot.status.is_over() {
        let _ = write!(line, " | {}", status_text(snapshot.status));
    }
    line
}

/// Review details for the displayed ply plus the game's quality tally.
/// `None` outside a game review.
pub fn review_lines(snapshot: &SessionSnapshot) -> Option<String> {
    let counts = snapshot.review_counts?;
    let mut out = Severity::ALL
        .iter()
        .map(|sev| format!("{} {}", counts.get(*sev), sev))
        .collect::<Vec<_>>()
        .join(", ");
    if let Some(comment) = &snapshot.current_comment {
        let _ = write!(out, "\n  {comment}");
    }
    Some(out)
}

pub fn event_line(event: &SessionEvent) -> Option<String> {
    let text = match event {
        SessionEvent::MoveCommitted { source, san, .. } => format!("{source:?}: {san}"),
        SessionEvent::MoveRejected { uci, checked_king } => match checked_king {
            Some(king) => format!("illegal move {uci} (king on {king} is in check)"),
            None => format!("illegal move {uci}"),
        },
        SessionEvent::PromotionRequired { from, to } => format!("{from}{to} promotes: choose q, r, b or n"),
        SessionEvent::PremoveStaged { from, to } => format!("premove {from}{to} staged"),
        SessionEvent::PremoveDiscarded => "premove discarded".to_string(),
        SessionEvent::PuzzleIncorrect { .. } => "not the right move; 'ack' to take it back".to_string(),
        SessionEvent::PuzzleUnlocked => "try again".to_string(),
        SessionEvent::PuzzleSolved => "puzzle solved".to_string(),
        SessionEvent::PuzzleHint(text) => format!("assistant: {text}"),
        SessionEvent::ReviewLoaded { code, plies } => format!("review of {code}: {plies} moves, 'forward' to step"),
        SessionEvent::BotsListed(bots) => {
            let names: Vec<String> = bots.iter().map(|b| format!("{} {}", b.id, b.name)).collect();
            format!("bots: {}", names.join(", "))
        }
        SessionEvent::PuzzleReport(report) => match report.new_rating {
            Some(rating) => format!("server: correct={} rating {rating}", report.correct),
            None => format!("server: correct={}", report.correct),
        },
        SessionEvent::GameFinished { status, outcome } => {
            format!("{} ({})", status_text(*status), outcome_text(*outcome))
        }
        SessionEvent::StatusReported(status) => format!("{} (waiting for the server)", status_text(*status)),
        SessionEvent::GameOver { outcome } => format!("game over: {}", outcome_text(*outcome)),
        SessionEvent::Connection(status) => format!("connection {status:?}"),
        SessionEvent::ServerError(message) => format!("server error: {message}"),
        SessionEvent::RoomCreated { code } => format!("room {code} created"),
        SessionEvent::RequestFailed { request, reason } => format!("{request} failed: {reason}"),
        SessionEvent::SideResolved(side) => format!("you play {}", side_name(*side)),
        SessionEvent::PhaseChanged(_) => return None,
    };
    Some(text)
}

fn side_name(side: PlayerSide) -> &'static str {
    match side {
        PlayerSide::White => "white",
        PlayerSide::Black => "black",
        PlayerSide::Unresolved => "?",
    }
}

fn status_text(status: GameStatus) -> String {
    match status {
        GameStatus::Ongoing => "ongoing".to_string(),
        GameStatus::Checkmate { winner } => format!("checkmate, {winner:?} wins"),
        GameStatus::Stalemate => "stalemate".to_string(),
        GameStatus::InsufficientMaterial => "draw by insufficient material".to_string(),
        GameStatus::FiftyMoveRule => "draw by fifty-move rule".to_string(),
        GameStatus::ThreefoldRepetition => "draw by threefold repetition".to_string(),
    }
}

fn outcome_text(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Win => "you win",
        Outcome::Lose => "you lose",
        Outcome::Draw => "draw",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_session::{GameMode, Phase};

    fn snapshot(fen: &str, side: PlayerSide) -> SessionSnapshot {
        SessionSnapshot {
            fen: fen.to_string(),
            cursor: 0,
            len: 0,
            movetext: String::new(),
            last_move: None,
            checked_king: None,
            status: GameStatus::Ongoing,
            phase: Phase::Playing,
            side,
            mode: GameMode::Bot,
            connection: ConnectionStatus::Idle,
            premove: None,
            pending_promotion: None,
            puzzle_locked: false,
            puzzle_progress: None,
            rating: None,
            rating_change: None,
            puzzle_hint: None,
            review_marks: None,
            review_counts: None,
            current_mark: None,
            current_comment: None,
        }
    }

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    #[test]
    fn test_board_orientation() {
        let white = board(&snapshot(START, PlayerSide::White));
        assert!(white.starts_with("8  r  n  b  q  k  b  n  r"));
        let black = board(&snapshot(START, PlayerSide::Black));
        assert!(black.starts_with("1  R  N  B  K  Q  B  N  R"));
        assert!(black.trim_end().ends_with("h  g  f  e  d  c  b  a"));
    }

    #[test]
    fn test_last_move_marked() {
        let mut snap = snapshot(
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1",
            PlayerSide::White,
        );
        snap.last_move = Some((Square::E2, Square::E4));
        let text = board(&snap);
        assert!(text.contains("[P]"));
        assert!(text.contains("[.]"));
    }

    #[test]
    fn test_status_line_details() {
        let mut snap = snapshot(START, PlayerSide::White);
        snap.puzzle_progress = Some((1, 3));
        snap.puzzle_locked = true;
        snap.rating = Some(1510);
        snap.rating_change = Some(-8);
        let line = status_line(&snap);
        assert!(line.contains("puzzle 1/3 (locked"));
        assert!(line.contains("rating 1510 (-8)"));
    }

    #[test]
    fn test_review_details() {
        let mut snap = snapshot(START, PlayerSide::White);
        assert_eq!(review_lines(&snap), None);

        let mut counts = chess_session::SeverityCounts::default();
        counts.add(Severity::Blunder);
        counts.add(Severity::Great);
        snap.review_counts = Some(counts);
        snap.current_mark = Some(Severity::Blunder);
        snap.current_comment = Some("Hangs the queen.".into());

        assert!(status_line(&snap).ends_with("| ?? blunder"));
        assert_eq!(
            review_lines(&snap).unwrap(),
            "0 brilliant, 1 great, 0 inaccuracy, 0 mistake, 1 blunder\n  Hangs the queen."
        );
    }

    #[test]
    fn test_event_lines() {
        assert_eq!(event_line(&SessionEvent::PhaseChanged(Phase::Idle)), None);
        assert_eq!(
            event_line(&SessionEvent::GameOver { outcome: Outcome::Win }).as_deref(),
            Some("game over: you win")
        );
    }
}
