use rusqlite::Connection;

/// Shared pragmas for every queue connection. WAL plus a busy timeout is
/// what lets multiple runner processes claim jobs against the same file.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n\
         PRAGMA foreign_keys = ON;\n",
    )
}
