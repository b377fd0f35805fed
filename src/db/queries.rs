/// Read queries over the materialized caches
use crate::db::models::{Game, Move};
use crate::error::{AppViewError, AppViewResult};
use sqlx::sqlite::SqlitePool;

/// Standard chess starting position
pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 100;

/// Fetch a single game by AT-URI
pub async fn get_game(pool: &SqlitePool, uri: &str) -> AppViewResult<Option<Game>> {
    let game = sqlx::query_as::<_, Game>("SELECT * FROM game WHERE uri = ?")
        .bind(uri)
        .fetch_optional(pool)
        .await?;

    Ok(game)
}

/// Fetch a single move by AT-URI
pub async fn get_move(pool: &SqlitePool, uri: &str) -> AppViewResult<Option<Move>> {
    let mv = sqlx::query_as::<_, Move>("SELECT * FROM move WHERE uri = ?")
        .bind(uri)
        .fetch_optional(pool)
        .await?;

    Ok(mv)
}

/// The highest-numbered move of a game, if any
pub async fn get_latest_move(pool: &SqlitePool, game_uri: &str) -> AppViewResult<Option<Move>> {
    let mv = sqlx::query_as::<_, Move>(
        "SELECT * FROM move WHERE gameUri = ? ORDER BY moveNumber DESC LIMIT 1",
    )
    .bind(game_uri)
    .fetch_optional(pool)
    .await?;

    Ok(mv)
}

/// List games, newest first, optionally filtered by player and status.
///
/// `player` matches either side of the challenge. The keyset cursor is
/// `"{createdAt}::{uri}"` of the last returned row; pass it back to fetch
/// the next page. Returns the next cursor only when a full page came back.
pub async fn list_games(
    pool: &SqlitePool,
    player: Option<&str>,
    status: Option<&str>,
    limit: Option<i64>,
    cursor: Option<&str>,
) -> AppViewResult<(Vec<Game>, Option<String>)> {
    let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);

    let mut sql = String::from("SELECT * FROM game WHERE 1=1");
    if player.is_some() {
        sql.push_str(" AND (challenger = ? OR challenged = ?)");
    }
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if cursor.is_some() {
        sql.push_str(" AND (createdAt < ? OR (createdAt = ? AND uri < ?))");
    }
    sql.push_str(" ORDER BY createdAt DESC, uri DESC LIMIT ?");

    let mut query = sqlx::query_as::<_, Game>(&sql);
    if let Some(did) = player {
        query = query.bind(did).bind(did);
    }
    if let Some(status) = status {
        query = query.bind(status);
    }
    if let Some(cursor) = cursor {
        let (created_at, uri) = parse_game_cursor(cursor)?;
        query = query.bind(created_at.clone()).bind(created_at).bind(uri);
    }
    let games = query.bind(limit).fetch_all(pool).await?;

    let next_cursor = if games.len() as i64 == limit {
        games
            .last()
            .map(|g| format!("{}::{}", g.created_at, g.uri))
    } else {
        None
    };

    Ok((games, next_cursor))
}

/// List a game's moves in ascending move order.
///
/// The cursor is the last-seen move number.
pub async fn list_moves(
    pool: &SqlitePool,
    game_uri: &str,
    limit: Option<i64>,
    cursor: Option<&str>,
) -> AppViewResult<(Vec<Move>, Option<String>)> {
    let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let after: i64 = match cursor {
        Some(c) => c
            .parse()
            .map_err(|_| AppViewError::Validation("Invalid cursor".to_string()))?,
        None => 0,
    };

    let moves = sqlx::query_as::<_, Move>(
        "SELECT * FROM move WHERE gameUri = ? AND moveNumber > ? \
         ORDER BY moveNumber ASC LIMIT ?",
    )
    .bind(game_uri)
    .bind(after)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let next_cursor = if moves.len() as i64 == limit {
        moves.last().map(|m| m.move_number.to_string())
    } else {
        None
    };

    Ok((moves, next_cursor))
}

/// Current board position of a game: the fen carried by the latest move
/// that recorded one, falling back to the starting position.
pub async fn current_fen(pool: &SqlitePool, game_uri: &str) -> AppViewResult<String> {
    let fen: Option<(String,)> = sqlx::query_as(
        "SELECT fen FROM move WHERE gameUri = ? AND fen IS NOT NULL \
         ORDER BY moveNumber DESC LIMIT 1",
    )
    .bind(game_uri)
    .fetch_optional(pool)
    .await?;

    Ok(fen.map(|(f,)| f).unwrap_or_else(|| START_FEN.to_string()))
}

fn parse_game_cursor(cursor: &str) -> AppViewResult<(String, String)> {
    match cursor.split_once("::") {
        Some((created_at, uri)) if !created_at.is_empty() && !uri.is_empty() => {
            Ok((created_at.to_string(), uri.to_string()))
        }
        _ => Err(AppViewError::Validation("Invalid cursor".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now_rfc3339;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn insert_game(pool: &SqlitePool, uri: &str, challenger: &str, created_at: &str) {
        sqlx::query(
            "INSERT INTO game (uri, challenger, challenged, startsFirst, status, createdAt, indexedAt) \
             VALUES (?, ?, 'did:plc:bob', ?, 'pending', ?, ?)",
        )
        .bind(uri)
        .bind(challenger)
        .bind(challenger)
        .bind(created_at)
        .bind(now_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_move(pool: &SqlitePool, uri: &str, game_uri: &str, number: i64, fen: Option<&str>) {
        sqlx::query(
            "INSERT INTO move (uri, gameUri, playerDid, move, fen, moveNumber, createdAt, indexedAt) \
             VALUES (?, ?, 'did:plc:alice', 'e4', ?, ?, ?, ?)",
        )
        .bind(uri)
        .bind(game_uri)
        .bind(fen)
        .bind(number)
        .bind(now_rfc3339())
        .bind(now_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_get_game_missing() {
        let pool = setup_test_db().await;
        let game = get_game(&pool, "at://did:plc:alice/com.atpchess.game/none")
            .await
            .unwrap();
        assert!(game.is_none());
    }

    #[tokio::test]
    async fn test_list_games_filters_and_order() {
        let pool = setup_test_db().await;
        insert_game(&pool, "at://a/1", "did:plc:alice", "2024-01-01T00:00:00.000Z").await;
        insert_game(&pool, "at://a/2", "did:plc:alice", "2024-01-03T00:00:00.000Z").await;
        insert_game(&pool, "at://c/1", "did:plc:carol", "2024-01-02T00:00:00.000Z").await;

        let (games, cursor) = list_games(&pool, None, None, None, None).await.unwrap();
        assert_eq!(games.len(), 3);
        assert!(cursor.is_none());
        // Newest first
        assert_eq!(games[0].uri, "at://a/2");
        assert_eq!(games[1].uri, "at://c/1");
        assert_eq!(games[2].uri, "at://a/1");

        let (games, _) = list_games(&pool, Some("did:plc:alice"), None, None, None)
            .await
            .unwrap();
        assert_eq!(games.len(), 2);

        // challenged side matches too
        let (games, _) = list_games(&pool, Some("did:plc:bob"), None, None, None)
            .await
            .unwrap();
        assert_eq!(games.len(), 3);

        let (games, _) = list_games(&pool, None, Some("active"), None, None)
            .await
            .unwrap();
        assert!(games.is_empty());
    }

    #[tokio::test]
    async fn test_list_games_keyset_pagination() {
        let pool = setup_test_db().await;
        for i in 1..=5 {
            insert_game(
                &pool,
                &format!("at://a/{}", i),
                "did:plc:alice",
                &format!("2024-01-0{}T00:00:00.000Z", i),
            )
            .await;
        }

        let (page1, cursor) = list_games(&pool, None, None, Some(2), None).await.unwrap();
        assert_eq!(page1.len(), 2);
        let cursor = cursor.unwrap();
        assert_eq!(cursor, format!("{}::{}", page1[1].created_at, page1[1].uri));

        let (page2, cursor2) = list_games(&pool, None, None, Some(2), Some(&cursor))
            .await
            .unwrap();
        assert_eq!(page2.len(), 2);
        assert_ne!(page1[1].uri, page2[0].uri);

        let (page3, cursor3) = list_games(&pool, None, None, Some(2), cursor2.as_deref())
            .await
            .unwrap();
        assert_eq!(page3.len(), 1);
        assert!(cursor3.is_none());

        // All five seen exactly once
        let mut uris: Vec<String> = page1
            .iter()
            .chain(&page2)
            .chain(&page3)
            .map(|g| g.uri.clone())
            .collect();
        uris.sort();
        uris.dedup();
        assert_eq!(uris.len(), 5);
    }

    #[tokio::test]
    async fn test_list_games_rejects_malformed_cursor() {
        let pool = setup_test_db().await;
        let err = list_games(&pool, None, None, None, Some("garbage"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppViewError::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_moves_ascending_with_cursor() {
        let pool = setup_test_db().await;
        let game = "at://did:plc:alice/com.atpchess.game/g1";
        for i in 1..=4 {
            insert_move(&pool, &format!("at://m/{}", i), game, i, None).await;
        }

        let (page1, cursor) = list_moves(&pool, game, Some(3), None).await.unwrap();
        assert_eq!(page1.len(), 3);
        assert_eq!(page1[0].move_number, 1);
        assert_eq!(cursor.as_deref(), Some("3"));

        let (page2, cursor2) = list_moves(&pool, game, Some(3), cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].move_number, 4);
        assert!(cursor2.is_none());
    }

    #[tokio::test]
    async fn test_latest_move_and_current_fen() {
        let pool = setup_test_db().await;
        let game = "at://did:plc:alice/com.atpchess.game/g1";

        assert_eq!(current_fen(&pool, game).await.unwrap(), START_FEN);

        insert_move(&pool, "at://m/1", game, 1, Some("fen-after-1")).await;
        insert_move(&pool, "at://m/2", game, 2, None).await;

        let latest = get_latest_move(&pool, game).await.unwrap().unwrap();
        assert_eq!(latest.move_number, 2);

        // Latest move carried no fen; fall back to the newest one that did
        assert_eq!(current_fen(&pool, game).await.unwrap(), "fen-after-1");
    }
}
