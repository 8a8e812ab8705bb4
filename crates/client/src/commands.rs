//! Line-oriented command parsing for the terminal client.

use anyhow::{anyhow, bail, Context, Result};
use chess_core::pgn::{extract_header, extract_san_moves};
use chess_core::{parse_promotion, Candidate};
use chess_session::{Command, CreateRoomRequest, RoomMode, SideChoice};

pub const HELP: &str = "\
commands:
  new [white|black|random]          play the bot
  fen <fen>                         play the bot from a position
  analysis [fen]                    free board, both sides
  review <pgn>                      browse a game
  analyze <code>                    review a finished game's analysis
  bots                              list computer opponents
  puzzle [id]                       load a puzzle (random without id)
  <uci> | move <uci>                move, e.g. e2e4 or e7e8q
  promote <q|r|b|n>                 finish a pending promotion
  cancel                            drop a pending promotion or premove
  back [n] | forward [n] | goto <n> move through the history
  ack                               take back a wrong puzzle move
  join <room> [white|black|random]  join an online room
  create [bot|pvp] [side] [bot_id]  create a room
  token <token>                     set the access token
  forfeit | reset | help | quit";

#[derive(Debug, Clone)]
pub enum Input {
    Commands(Vec<Command>),
    Help,
    Quit,
    Nothing,
}

pub fn parse_line(line: &str) -> Result<Input> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();

    let command = match word.to_ascii_lowercase().as_str() {
        "" => return Ok(Input::Nothing),
        "help" | "?" => return Ok(Input::Help),
        "quit" | "exit" | "q" => return Ok(Input::Quit),
        "new" => Command::StartGame(parse_side(args.next())?),
        "fen" => {
            if rest.is_empty() {
                bail!("fen needs a position");
            }
            Command::StartFromFen {
                fen: rest.to_string(),
                side: None,
            }
        }
        "analysis" => Command::StartAnalysis {
            fen: (!rest.is_empty()).then(|| rest.to_string()),
        },
        "review" => {
            let sans = extract_san_moves(rest);
            if sans.is_empty() {
                bail!("no moves found in review text");
            }
            Command::LoadReview {
                fen: extract_header(rest, "FEN"),
                sans,
            }
        }
        "analyze" | "analyse" => Command::LoadAnalysis {
            code: args
                .next()
                .ok_or_else(|| anyhow!("analyze needs a room code"))?
                .to_string(),
        },
        "bots" => Command::ListBots,
        "puzzle" => Command::LoadPuzzle {
            id: args.next().map(str::to_string),
        },
        "move" => Command::Move(parse_candidate(args.next().ok_or_else(|| anyhow!("move needs a uci move"))?)?),
        "promote" => {
            let letter = args.next().unwrap_or("q");
            Command::Promote(parse_promotion(letter).with_context(|| format!("bad promotion piece '{letter}'"))?)
        }
        "cancel" => return Ok(Input::Commands(vec![Command::CancelPromotion, Command::CancelPremove])),
        "back" | "undo" => Command::Undo(parse_count(args.next())?),
        "forward" | "redo" => Command::Redo(parse_count(args.next())?),
        "goto" => {
            let ply = args.next().ok_or_else(|| anyhow!("goto needs a ply number"))?;
            Command::Navigate(ply.parse().with_context(|| format!("bad ply '{ply}'"))?)
        }
        "ack" => Command::AcknowledgePuzzle,
        "join" => {
            let room = args.next().ok_or_else(|| anyhow!("join needs a room code"))?;
            Command::JoinRoom {
                room: room.to_string(),
                side: parse_side(args.next())?,
            }
        }
        "create" => {
            let mode = match args.next().map(str::to_ascii_lowercase).as_deref() {
                None | Some("bot") => RoomMode::Bot,
                Some("pvp") => RoomMode::Pvp,
                Some(other) => bail!("unknown room mode '{other}'"),
            };
            let side = parse_side(args.next())?;
            let bot_id = match args.next() {
                Some(id) => id.parse().with_context(|| format!("bad bot id '{id}'"))?,
                None => 1,
            };
            Command::CreateRoom(CreateRoomRequest {
                mode,
                side,
                name: None,
                bot_id,
            })
        }
        "token" => {
            if rest.is_empty() {
                bail!("token needs a value");
            }
            Command::SetToken(rest.to_string())
        }
        "forfeit" | "resign" => Command::Forfeit,
        "reset" => Command::Reset,
        _ if rest.is_empty() => Command::Move(parse_candidate(word)?),
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(Input::Commands(vec![command]))
}

fn parse_candidate(text: &str) -> Result<Candidate> {
    text.parse::<Candidate>()
        .with_context(|| format!("'{text}' is not a command or a uci move"))
}

fn parse_side(arg: Option<&str>) -> Result<SideChoice> {
    match arg.map(str::to_ascii_lowercase).as_deref() {
        None | Some("random") | Some("r") => Ok(SideChoice::Random),
        Some("white") | Some("w") => Ok(SideChoice::White),
        Some("black") | Some("b") => Ok(SideChoice::Black),
        Some(other) => bail!("unknown side '{other}'"),
    }
}

fn parse_count(arg: Option<&str>) -> Result<usize> {
    match arg {
        None => Ok(1),
        Some(n) => n.parse().with_context(|| format!("bad count '{n}'")),
    }
}
