use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use quantum_chess::board::Board;
use quantum_chess::events::{MoveType, ServerEvent, SyncRequest};
use quantum_chess::history::{HistoryError, InMemoryHistory, MoveHistory, MoveRecord};
use quantum_chess::logging::MemoryEventLog;
use quantum_chess::repository::{BoardRepository, InMemoryRepository};
use quantum_chess::session::{GameService, MoveRequest, ObserveRequest, ObserverMoveRequest};
use quantum_chess::{
    Color, EngineConfig, GameId, GameSnapshot, GameStatus, Piece, PieceData, PieceId, PieceType, QuantumEvent, QuantumState,
    Square,
};

fn sq(s: &str) -> Square {
    s.parse().unwrap()
}

fn service() -> GameService {
    GameService::new(EngineConfig::default()).expect("default config is valid")
}

fn play(service: &GameService, game: &GameId, from: &str, to: &str, player: Color) -> quantum_chess::MoveResponse {
    let request = MoveRequest { game_id: game.clone(), from_square: sq(from), to_square: sq(to), player };
    service.make_move(&request).unwrap_or_else(|e| panic!("{}{} should be legal: {}", from, to, e))
}

fn piece<'a>(snapshot: &'a GameSnapshot, id: &str) -> &'a PieceData {
    snapshot.pieces.iter().find(|p| p.piece.id == PieceId::from(id)).unwrap_or_else(|| panic!("{} not on the board", id))
}

#[test]
fn pawn_push_enters_superposition() {
    let service = service();
    let game = service.new_game("alice", "bob").unwrap();

    let response = play(&service, &game, "d2", "d4", Color::White);
    assert!(response.success);
    assert_eq!(response.move_type, MoveType::QuantumSplit);
    assert_eq!(response.message, "Move executed: d2 -> d4");
    assert_eq!(
        response.quantum_events,
        vec![QuantumEvent::SuperpositionCreated { piece_id: PieceId::from("pawn-w-4"), positions: vec![sq("d2"), sq("d4")] }]
    );

    let pawn = piece(&response.new_state, "pawn-w-4");
    assert_eq!(pawn.piece.quantum_state, QuantumState::Superposed);
    assert!(pawn.piece.positions.iter().all(|o| o.is_ghost));
    assert_eq!(response.new_state.game.active_player, Color::Black);

    let board = service.board(&game).unwrap();
    assert_eq!(board.get_superposition_positions(&PieceId::from("pawn-w-4")), Some((sq("d2"), sq("d4"))));
    assert!(board.get_piece_at_square(sq("d4")).is_none());

    let moves = service.moves(&game).unwrap();
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].piece_type, PieceType::Pawn);
    assert_eq!(moves[0].move_type, MoveType::QuantumSplit);
}

#[test]
fn e_pawn_splits_in_a_custom_position() {
    let service = service();
    let board = Board::from_layout(
        GameId::generate(),
        vec![
            Piece::new("king-w-1", PieceType::King, Color::White, sq("e1")),
            Piece::new("pawn-w-5", PieceType::Pawn, Color::White, sq("e2")),
            Piece::new("king-b-1", PieceType::King, Color::Black, sq("e8")),
        ],
    );
    let game = service.load_game(board).unwrap();
    let response = play(&service, &game, "e2", "e4", Color::White);
    let pawn = piece(&response.new_state, "pawn-w-5");
    assert_eq!(pawn.piece.squares(), vec![sq("e2"), sq("e4")]);
    assert_eq!(pawn.piece.move_count, 1);
}

#[test]
fn moves_out_of_turn_are_rejected() {
    let service = service();
    let game = service.new_game("w", "b").unwrap();
    let request = MoveRequest { game_id: game.clone(), from_square: sq("d7"), to_square: sq("d5"), player: Color::Black };
    let err = service.make_move(&request).unwrap_err();
    assert_eq!(err.code(), "TURN_ORDER_ERROR");
    assert_eq!(err.to_string(), "It's white's turn, but black attempted to move");

    let err = service
        .make_move(&MoveRequest { game_id: game.clone(), from_square: sq("b1"), to_square: sq("b3"), player: Color::White })
        .unwrap_err();
    assert_eq!(err.to_string(), "Invalid move b1 -> b3: Invalid move pattern for knight");
    assert_eq!(service.state(&game).unwrap().game.current_turn, 1);
}

#[test]
fn unknown_games_are_reported() {
    let service = service();
    let missing = GameId::from("no-such-game");
    assert_eq!(service.state(&missing).unwrap_err().code(), "GAME_NOT_FOUND");
    let request = MoveRequest { game_id: missing, from_square: sq("d2"), to_square: sq("d4"), player: Color::White };
    assert_eq!(service.make_move(&request).unwrap_err().code(), "GAME_NOT_FOUND");
}

#[test]
fn overlapping_knights_entangle() {
    let service = service();
    let board = Board::from_layout(
        GameId::generate(),
        vec![
            Piece::new("king-w-1", PieceType::King, Color::White, sq("h1")),
            Piece::new("knight-w-1", PieceType::Knight, Color::White, sq("b1")),
            Piece::new("king-b-1", PieceType::King, Color::Black, sq("h8")),
            Piece::new("knight-b-1", PieceType::Knight, Color::Black, sq("e4")),
        ],
    );
    let game = service.load_game(board).unwrap();

    play(&service, &game, "b1", "c3", Color::White);
    let response = play(&service, &game, "e4", "c3", Color::Black);
    assert!(response.quantum_events.contains(&QuantumEvent::EntanglementFormed {
        pieces: [PieceId::from("knight-b-1"), PieceId::from("knight-w-1")],
        overlap_square: sq("c3"),
    }));

    let white = piece(&response.new_state, "knight-w-1");
    assert_eq!(white.piece.quantum_state, QuantumState::Entangled);
    assert_eq!(white.entangled_with, vec![PieceId::from("knight-b-1")]);

    let observe = ObserveRequest { game_id: game.clone(), piece_id: PieceId::from("knight-w-1"), player: Color::White };
    let observed = service.observe(&observe).unwrap();
    assert!([sq("b1"), sq("c3")].contains(&observed.collapsed_position));
    assert_eq!(observed.new_state.game.white_observations_left, 0);
    assert_eq!(observed.new_state.game.active_player, Color::White);
}

#[test]
fn moving_the_observer_collapses_nearby_pieces() {
    let service = service();
    let game = service.new_game("w", "b").unwrap();
    play(&service, &game, "d2", "d4", Color::White);
    play(&service, &game, "a7", "a6", Color::Black);

    let preview = service.observation_zone(&game, &PieceId::from("observer-w-1")).unwrap();
    assert_eq!(preview.position, sq("e2"));
    assert!(preview.affected_pieces.iter().any(|p| p.piece_id == PieceId::from("pawn-w-4") && p.will_collapse));

    let request = ObserverMoveRequest { game_id: game.clone(), observer_id: PieceId::from("observer-w-1"), to_square: sq("e3") };
    let response = service.move_observer(&request).unwrap();
    assert_eq!(response.new_position, sq("e3"));
    assert_eq!(response.observed_pieces, vec![PieceId::from("pawn-w-4")]);
    assert_eq!(response.collapsed_states[0].from_state, QuantumState::Superposed);

    let pawn = piece(&response.new_state, "pawn-w-4");
    assert_eq!(pawn.piece.quantum_state, QuantumState::Classical);
    assert_eq!(pawn.piece.positions.len(), 1);
    assert!(!pawn.piece.positions[0].is_ghost);
    assert_eq!(response.new_state.game.active_player, Color::Black);

    let stats = service.observer_stats(&game, &PieceId::from("observer-w-1")).unwrap();
    assert_eq!(stats.observations_made, 1);
    assert_eq!(stats.total_pieces_affected, 1);

    // The black pawn is far from the observer and stays split
    assert_eq!(piece(&response.new_state, "pawn-b-1").piece.quantum_state, QuantumState::Superposed);
}

#[test]
fn superpositions_expire_after_the_configured_duration() {
    let service = service();
    let game = service.new_game("w", "b").unwrap();
    play(&service, &game, "d2", "d4", Color::White);
    play(&service, &game, "g8", "f6", Color::Black);
    play(&service, &game, "b1", "c3", Color::White);
    let response = play(&service, &game, "a7", "a6", Color::Black);

    let collapsed: Vec<&PieceId> = response
        .quantum_events
        .iter()
        .filter_map(|e| match e {
            QuantumEvent::SuperpositionCollapsed { piece_id, .. } => Some(piece_id),
            _ => None,
        })
        .collect();
    assert_eq!(collapsed, vec![&PieceId::from("pawn-w-4")]);
    assert!(!piece(&response.new_state, "pawn-w-4").piece.is_superposed());
    assert!(piece(&response.new_state, "knight-b-2").piece.is_superposed());
}

#[test]
fn observation_tokens_do_not_carry_over() {
    let service = service();
    let game = service.new_game("w", "b").unwrap();
    play(&service, &game, "d2", "d4", Color::White);
    play(&service, &game, "g8", "f6", Color::Black);

    let observe = |piece: &str| ObserveRequest { game_id: game.clone(), piece_id: PieceId::from(piece), player: Color::White };
    service.observe(&observe("knight-b-2")).unwrap();
    let err = service.observe(&observe("pawn-w-4")).unwrap_err();
    assert_eq!(err.code(), "OBSERVATION_ERROR");

    play(&service, &game, "b1", "c3", Color::White);
    assert_eq!(service.state(&game).unwrap().game.black_observations_left, 1);
}

struct UnavailableHistory;

impl MoveHistory for UnavailableHistory {
    fn append(&self, _record: MoveRecord) -> Result<u32, HistoryError> {
        Err(HistoryError::Unavailable("database offline".to_string()))
    }

    fn moves(&self, _game_id: &GameId) -> Result<Vec<MoveRecord>, HistoryError> {
        Err(HistoryError::Unavailable("database offline".to_string()))
    }
}

#[test]
fn history_failures_do_not_undo_moves() {
    let log = MemoryEventLog::new();
    let service = GameService::with_parts(
        EngineConfig::default(),
        Arc::new(InMemoryRepository::new()),
        Arc::new(UnavailableHistory),
        log.clone(),
    )
    .unwrap();
    let game = service.new_game("w", "b").unwrap();
    let response = play(&service, &game, "d2", "d4", Color::White);
    assert!(response.success);
    assert_eq!(service.state(&game).unwrap().game.current_turn, 2);
    assert_eq!(service.moves(&game).unwrap_err().code(), "STORAGE_ERROR");
    assert!(log.kinds().contains(&"move_executed"));
}

#[test]
fn viewers_receive_move_and_state_events() {
    let service = GameService::with_parts(
        EngineConfig::default(),
        Arc::new(InMemoryRepository::new()),
        Arc::new(InMemoryHistory::new()),
        MemoryEventLog::new(),
    )
    .unwrap();
    let game = service.new_game("w", "b").unwrap();
    let mut viewer = service.subscribe(&game);

    play(&service, &game, "d2", "d4", Color::White);
    match viewer.try_recv().unwrap() {
        ServerEvent::MoveMade { player, move_type, from_square, .. } => {
            assert_eq!(player, Color::White);
            assert_eq!(move_type, MoveType::QuantumSplit);
            assert_eq!(from_square, sq("d2"));
        }
        other => panic!("expected move_made, got {:?}", other),
    }
    assert!(matches!(viewer.try_recv().unwrap(), ServerEvent::GameUpdated(state) if state.game.current_turn == 2));

    service.disconnect(&game, Color::Black).unwrap();
    assert_eq!(viewer.try_recv().unwrap(), ServerEvent::PlayerDisconnected { game_id: game.clone(), player: Color::Black });

    let sync = service.sync(&SyncRequest { game_id: game.clone() }).unwrap();
    assert!(matches!(sync, ServerEvent::SyncResponse(state) if state.game.active_player == Color::Black));
}

#[test]
fn resigned_games_accept_no_more_moves() {
    let service = service();
    let game = service.new_game("w", "b").unwrap();
    let state = service.end_game(&game, GameStatus::Resigned, Some(Color::Black)).unwrap();
    assert_eq!(state.game.winner, Some(Color::Black));

    let request = MoveRequest { game_id: game.clone(), from_square: sq("d2"), to_square: sq("d4"), player: Color::White };
    assert_eq!(service.make_move(&request).unwrap_err().code(), "GAME_STATE_ERROR");
}

#[test]
fn snapshot_serializes_for_the_wire() {
    let service = service();
    let game = service.new_game("w", "b").unwrap();
    let response = play(&service, &game, "b1", "c3", Color::White);
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["move_type"], "quantum_split");
    assert_eq!(json["quantum_events"][0]["type"], "superposition_created");
    let knight = json["new_state"]["pieces"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["id"] == "knight-w-1")
        .unwrap();
    assert_eq!(knight["type"], "knight");
    assert_eq!(knight["quantum_state"], "superposed");
}

#[test]
fn pieces_cannot_land_on_a_friendly_ghost() {
    let service = service();
    for _ in 0..16 {
        let board = Board::from_layout(
            GameId::generate(),
            vec![
                Piece::new("king-w-1", PieceType::King, Color::White, sq("e1")),
                Piece::new("knight-w-1", PieceType::Knight, Color::White, sq("b1")),
                Piece::new("rook-w-1", PieceType::Rook, Color::White, sq("a3")),
                Piece::new("king-b-1", PieceType::King, Color::Black, sq("h8")),
            ],
        );
        let game = service.load_game(board).unwrap();
        play(&service, &game, "b1", "c3", Color::White);
        play(&service, &game, "h8", "h7", Color::Black);

        let onto_ghost = MoveRequest { game_id: game.clone(), from_square: sq("a3"), to_square: sq("c3"), player: Color::White };
        let err = service.make_move(&onto_ghost).unwrap_err();
        assert_eq!(err.code(), "INVALID_MOVE");
        assert_eq!(err.to_string(), "Invalid move a3 -> c3: Square is held by superposed knight-w-1");
        assert_eq!(service.state(&game).unwrap().game.active_player, Color::White);

        play(&service, &game, "a3", "a4", Color::White);
        let response = play(&service, &game, "h7", "h8", Color::Black);
        assert!(!piece(&response.new_state, "knight-w-1").piece.is_superposed());

        let board = service.board(&game).unwrap();
        for square in Square::all() {
            let real = board.live_pieces().filter(|p| p.real_square() == Some(square)).count();
            assert!(real <= 1, "{} real pieces on {}", real, square);
        }
    }
}

#[test]
fn readers_never_see_a_half_applied_update() {
    let repository = Arc::new(InMemoryRepository::new());
    let service = GameService::with_parts(
        EngineConfig::default(),
        repository.clone(),
        Arc::new(InMemoryHistory::new()),
        MemoryEventLog::new(),
    )
    .unwrap();
    let game = service.new_game("w", "b").unwrap();
    let midway = Barrier::new(2);

    thread::scope(|scope| {
        let reader = scope.spawn(|| {
            midway.wait();
            let state = service.state(&game).unwrap();
            (state.game.current_turn, state.game.active_player)
        });

        repository
            .update(&game, &mut |board| {
                board.info.current_turn += 1;
                midway.wait();
                thread::sleep(Duration::from_millis(50));
                board.info.active_player = Color::Black;
                Ok(())
            })
            .unwrap();

        let seen = reader.join().unwrap();
        assert!(seen == (1, Color::White) || seen == (2, Color::Black), "reader saw {:?}", seen);
    });
}

#[test]
fn games_progress_independently_on_separate_threads() {
    let service = service();
    let games: Vec<GameId> = (0..4).map(|_| service.new_game("w", "b").unwrap()).collect();

    thread::scope(|scope| {
        for game in &games {
            let service = &service;
            scope.spawn(move || {
                play(service, game, "b1", "c3", Color::White);
                play(service, game, "g8", "f6", Color::Black);
                play(service, game, "d2", "d4", Color::White);
            });
        }
    });

    for game in &games {
        let state = service.state(game).unwrap();
        assert_eq!(state.game.current_turn, 4);
        assert_eq!(state.game.active_player, Color::Black);
        assert_eq!(service.moves(game).unwrap().len(), 3);
    }
}
