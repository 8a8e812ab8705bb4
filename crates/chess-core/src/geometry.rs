//! Premove plausibility: could this piece reach that square once it is our
//! turn again? Only board geometry is considered, not checks or pins.

use shakmaty::{attacks, Board, Chess, Color, File, Position, Rank, Role, Square};

/// True when the piece of `color` on `from` could plausibly move to `to`
/// after the opponent replies. Pins and checks are ignored; the move is
/// re-validated when it is actually played.
pub fn is_plausible_premove(pos: &Chess, color: Color, from: Square, to: Square) -> bool {
    let board = pos.board();
    let Some(piece) = board.piece_at(from) else {
        return false;
    };
    if piece.color != color || from == to || board.by_color(color).contains(to) {
        return false;
    }

    match piece.role {
        Role::Pawn => pawn_reaches(board, color, from, to),
        Role::King => attacks::king_attacks(from).contains(to) || castle_reaches(board, color, from, to),
        _ => attacks::attacks(from, piece, board.occupied()).contains(to),
    }
}

fn pawn_reaches(board: &Board, color: Color, from: Square, to: Square) -> bool {
    let dir: i32 = if color == Color::White { 1 } else { -1 };
    let df = to.file() as i32 - from.file() as i32;
    let dr = to.rank() as i32 - from.rank() as i32;
    let start_rank = if color == Color::White { Rank::Second } else { Rank::Seventh };
    let empty = |sq: Square| board.piece_at(sq).is_none();

    match (df, dr) {
        (0, r) if r == dir => empty(to),
        (0, r) if r == 2 * dir && from.rank() == start_rank => {
            let mid = Square::from_coords(from.file(), Rank::new((from.rank() as i32 + dir) as u32));
            empty(mid) && empty(to)
        }
        // Diagonals only make sense against an enemy piece already there.
        (-1 | 1, r) if r == dir => board.by_color(!color).contains(to),
        _ => false,
    }
}

fn castle_reaches(board: &Board, color: Color, from: Square, to: Square) -> bool {
    let back_rank = if color == Color::White { Rank::First } else { Rank::Eighth };
    if from != Square::from_coords(File::E, back_rank) || to.rank() != back_rank {
        return false;
    }
    let rook_file = match to.file() {
        File::G => File::H,
        File::C => File::A,
        _ => return false,
    };
    let rook_sq = Square::from_coords(rook_file, back_rank);
    let own_rook = board
        .piece_at(rook_sq)
        .is_some_and(|p| p.color == color && p.role == Role::Rook);
    own_rook && (attacks::between(from, rook_sq) & board.occupied()).is_empty()
}
