use std::error::Error;
use std::io::{self, Write};

use quantum_chess::board::GameStatus;
use quantum_chess::history::save_to_file;
use quantum_chess::logging::init_tracing;
use quantum_chess::session::{GameService, MoveRequest, ObserveRequest};
use quantum_chess::{Color, EngineConfig, GameId, MoveType, PieceId, QuantumEvent, Square};

const DEFAULT_HISTORY_FILENAME: &str = "quantum_chess_history.json";

// --- Input Parsing ---

#[derive(Debug, PartialEq)]
enum UserInput {
    Move(Square, Square),
    Command(Command),
}

#[derive(Debug, PartialEq)]
enum Command {
    Observe(PieceId),
    Moves(PieceId),
    Zone(PieceId),
    Stats(PieceId),
    State,
    History,
    SaveHistory(String),
    Resign,
    Draw,
    Help,
    Quit,
}

#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error("Unknown command: '{0}'. Type 'help' for commands.")]
    UnknownCommand(String),
    #[error("Missing argument for command: '{0}'")]
    MissingArgument(String),
    #[error("Invalid square in '{0}'")]
    InvalidSquare(String),
}

fn parse_user_input(input: &str) -> Result<UserInput, CommandError> {
    let trimmed = input.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let word = parts.next().unwrap_or("").to_lowercase();
    let argument = parts.next().unwrap_or("").trim();
    let piece_arg = |name: &str| {
        if argument.is_empty() { Err(CommandError::MissingArgument(name.to_string())) } else { Ok(PieceId::from(argument)) }
    };

    let command = match word.as_str() {
        "observe" => Command::Observe(piece_arg("observe")?),
        "moves" => Command::Moves(piece_arg("moves")?),
        "zone" => Command::Zone(piece_arg("zone")?),
        "stats" => Command::Stats(piece_arg("stats")?),
        "state" => Command::State,
        "history" => Command::History,
        "savehistory" => {
            Command::SaveHistory(if argument.is_empty() { DEFAULT_HISTORY_FILENAME } else { argument }.to_string())
        }
        "resign" => Command::Resign,
        "draw" => Command::Draw,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => return parse_move(trimmed),
    };
    Ok(UserInput::Command(command))
}

/// Accepts "d2d4" or "d2 d4".
fn parse_move(input: &str) -> Result<UserInput, CommandError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase();
    if compact.len() != 4 || !compact.is_ascii() {
        return Err(CommandError::UnknownCommand(input.to_string()));
    }
    let from = compact[0..2].parse().map_err(|_| CommandError::InvalidSquare(input.to_string()))?;
    let to = compact[2..4].parse().map_err(|_| CommandError::InvalidSquare(input.to_string()))?;
    Ok(UserInput::Move(from, to))
}

fn describe(event: &QuantumEvent) -> String {
    match event {
        QuantumEvent::SuperpositionCreated { piece_id, positions } => {
            let squares: Vec<String> = positions.iter().map(Square::to_string).collect();
            format!("{} splits across {}", piece_id, squares.join(" and "))
        }
        QuantumEvent::SuperpositionCollapsed { piece_id, collapsed_to } => format!("{} collapses to {}", piece_id, collapsed_to),
        QuantumEvent::EntanglementFormed { pieces, overlap_square } => {
            format!("{} and {} entangle over {}", pieces[0], pieces[1], overlap_square)
        }
        QuantumEvent::EntanglementBroken { pieces, reason } => format!("{} and {} disentangle ({:?})", pieces[0], pieces[1], reason),
        QuantumEvent::CascadeCollapse { piece_id, collapsed_to, caused_by, correlation } => {
            format!("{} follows {} to {} ({:?})", piece_id, caused_by, collapsed_to, correlation)
        }
        QuantumEvent::QuantumCapture { piece_id, captured_by, square } => {
            format!("{} captured by {} on {}", piece_id, captured_by, square)
        }
    }
}

fn load_config() -> Result<EngineConfig, Box<dyn Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(&path)?,
        None => EngineConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

// --- Main Game Loop ---

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing("quantum_chess=info");
    let service = GameService::new(load_config()?)?;
    let game_id: GameId = service.new_game("White", "Black")?;

    println!("==============================");
    println!("|       Quantum Chess        |");
    println!("==============================");
    print_help();

    'game_loop: loop {
        let board = service.board(&game_id)?;
        println!("------------------------------------------");
        println!("{}", board);

        if board.info.status != GameStatus::Active {
            match board.info.winner {
                Some(color) => println!("\n=== GAME OVER: {} wins ({}). ===", color, board.info.status),
                None => println!("\n=== GAME OVER: {}. ===", board.info.status),
            }
            break 'game_loop;
        }

        let player: Color = board.info.active_player;
        print!("\n{}'s turn. Enter move (e.g. d2d4) or command: ", player);
        io::stdout().flush()?;

        let mut input_line = String::new();
        match io::stdin().read_line(&mut input_line) {
            Ok(0) => {
                println!("\nEnd of input detected. Quitting game.");
                break 'game_loop;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading input: {}. Try again or use 'quit'/'exit'.", e);
                continue 'game_loop;
            }
        }
        let input = input_line.trim();
        if input.is_empty() {
            continue 'game_loop;
        }

        match parse_user_input(input) {
            Ok(UserInput::Move(from, to)) => {
                let request = MoveRequest { game_id: game_id.clone(), from_square: from, to_square: to, player };
                match service.make_move(&request) {
                    Ok(response) => {
                        if response.move_type == MoveType::QuantumSplit {
                            println!("Quantum move!");
                        }
                        println!("{}", response.message);
                        response.quantum_events.iter().for_each(|e| println!("  * {}", describe(e)));
                    }
                    Err(e) => println!("Error making move: {}", e),
                }
            }
            Ok(UserInput::Command(command)) => match command {
                Command::Observe(piece_id) => {
                    let request = ObserveRequest { game_id: game_id.clone(), piece_id: piece_id.clone(), player };
                    match service.observe(&request) {
                        Ok(response) => {
                            println!("{} observed at {}", piece_id, response.collapsed_position);
                            response.cascade_events.iter().for_each(|e| println!("  * {}", describe(e)));
                        }
                        Err(e) => println!("Error: {}", e),
                    }
                }
                Command::Moves(piece_id) => match service.valid_moves(&game_id, &piece_id) {
                    Ok(moves) => {
                        let list = |squares: &[Square]| squares.iter().map(Square::to_string).collect::<Vec<_>>().join(" ");
                        println!("Moves:    {}", list(&moves.valid_moves));
                        println!("Quantum:  {}", list(&moves.quantum_moves));
                        println!("Captures: {}", list(&moves.capture_moves));
                    }
                    Err(e) => println!("Error: {}", e),
                },
                Command::Zone(observer_id) => match service.observation_zone(&game_id, &observer_id) {
                    Ok(preview) => {
                        println!("{} watches {} squares around {}", observer_id, preview.zone_squares.len(), preview.position);
                        for piece in preview.affected_pieces {
                            let action = if piece.will_collapse { "collapses" } else { "disentangles" };
                            println!("  {} ({}) {}", piece.piece_id, piece.current_state, action);
                        }
                    }
                    Err(e) => println!("Error: {}", e),
                },
                Command::Stats(observer_id) => match service.observer_stats(&game_id, &observer_id) {
                    Ok(stats) => println!(
                        "{}: {} observations, {} distinct pieces affected",
                        stats.observer_id, stats.observations_made, stats.total_pieces_affected
                    ),
                    Err(e) => println!("Error: {}", e),
                },
                Command::State => println!("{}", serde_json::to_string_pretty(&service.state(&game_id)?)?),
                Command::History => match service.moves(&game_id) {
                    Ok(moves) if moves.is_empty() => println!("No moves yet."),
                    Ok(moves) => {
                        for record in moves {
                            println!(
                                "{:>3}. {} {} {} -> {} ({:?})",
                                record.sequence, record.player, record.piece_type, record.from_square, record.to_square, record.move_type
                            );
                        }
                    }
                    Err(e) => println!("Error: {}", e),
                },
                Command::SaveHistory(filename) => match save_to_file(service.history(), &game_id, &filename) {
                    Ok(()) => println!("Move history saved to '{}'.", filename),
                    Err(e) => println!("Error saving move history: {}", e),
                },
                Command::Resign => {
                    if let Err(e) = service.end_game(&game_id, GameStatus::Resigned, Some(player.opponent())) {
                        println!("Error: {}", e);
                    }
                }
                Command::Draw => {
                    if let Err(e) = service.end_game(&game_id, GameStatus::Draw, None) {
                        println!("Error: {}", e);
                    }
                }
                Command::Help => print_help(),
                Command::Quit => {
                    println!("Exiting game.");
                    break 'game_loop;
                }
            },
            Err(e) => println!("Input Error: {}", e),
        }
    }

    println!("\nGame session finished.");
    Ok(())
}

fn print_help() {
    println!("\nAvailable Commands:");
    println!("  <move>             Move a piece, e.g. d2d4 or 'g1 f3'.");
    println!("                     Knights always split into superposition; pawns split on straight pushes.");
    println!("                     Moving an Observer (o) collapses quantum pieces around it.");
    println!("  observe <piece>    Spend an observation token to collapse a superposed piece.");
    println!("  moves <piece>      List valid, quantum and capture moves for a piece.");
    println!("  zone <observer>    Preview the pieces an Observer would affect.");
    println!("  stats <observer>   Show an Observer's observation statistics.");
    println!("  state              Print the full game state as JSON.");
    println!("  history            List the moves played so far.");
    println!("  savehistory [file] Save the move history (default: {}).", DEFAULT_HISTORY_FILENAME);
    println!("  resign             Forfeit the game.");
    println!("  draw               End the game as a draw.");
    println!("  help               Show this help message.");
    println!("  quit / exit        Exit the game.");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(s: &str) -> Square { s.parse().unwrap() }

    #[test]
    fn parses_moves_in_both_forms() {
        assert_eq!(parse_user_input("d2d4").unwrap(), UserInput::Move(sq("d2"), sq("d4")));
        assert_eq!(parse_user_input("G1 F3").unwrap(), UserInput::Move(sq("g1"), sq("f3")));
        assert!(matches!(parse_user_input("z9a1"), Err(CommandError::InvalidSquare(_))));
        assert!(matches!(parse_user_input("castle"), Err(CommandError::UnknownCommand(_))));
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(
            parse_user_input("observe knight-w-1").unwrap(),
            UserInput::Command(Command::Observe(PieceId::from("knight-w-1")))
        );
        assert_eq!(
            parse_user_input("savehistory").unwrap(),
            UserInput::Command(Command::SaveHistory(DEFAULT_HISTORY_FILENAME.to_string()))
        );
        assert!(matches!(parse_user_input("zone"), Err(CommandError::MissingArgument(_))));
        assert_eq!(parse_user_input("exit").unwrap(), UserInput::Command(Command::Quit));
    }
}
