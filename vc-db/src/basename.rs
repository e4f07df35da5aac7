//! SQL-expression equivalent of the original's registered `BASENAME(path)`
//! application function (spec §4.2).
//!
//! sqlx's safe API does not expose SQLite scalar-function registration
//! the way `rusqlite` does, so rather than reach for the raw
//! `libsqlite3-sys` handle we express the same lowercased-last-segment
//! semantics as a SQL fragment built from `replace`/`rtrim`, a documented
//! idiom: `rtrim(x, replace(x, '/', ''))` strips every trailing
//! character that is *not* a literal `/`, leaving the directory prefix
//! up to and including the final separator, which `replace` then peels
//! off `x` to leave the basename.
//!
//! Backslashes are normalized to forward slashes first, matching the
//! original's `path.replace("\\", "/")` before splitting.

/// Build a SQL expression equivalent to `LOWER(BASENAME(<column>))`.
/// `column` must already be a safe identifier or qualified column
/// reference (never user input) since it is spliced into the fragment.
pub fn basename_expr(column: &str) -> String {
    format!(
        "lower(replace(replace({col}, '\\', '/'), \
         rtrim(replace({col}, '\\', '/'), replace(replace({col}, '\\', '/'), '/', '')), ''))",
        col = column
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::Row;

    #[tokio::test]
    async fn basename_expr_matches_last_segment_lowercased() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("create table t (path text)")
            .execute(&pool)
            .await
            .unwrap();

        let expr = basename_expr("path");
        for (input, expected) in [
            ("/Movies/Action/Film.MKV", "film.mkv"),
            ("C:\\Users\\me\\Video.mp4", "video.mp4"),
            ("justafile.txt", "justafile.txt"),
            ("/trailing/slash/", ""),
        ] {
            sqlx::query("delete from t").execute(&pool).await.unwrap();
            sqlx::query("insert into t (path) values (?)")
                .bind(input)
                .execute(&pool)
                .await
                .unwrap();
            let sql = format!("select {expr} as b from t");
            let row = sqlx::query(&sql).fetch_one(&pool).await.unwrap();
            let basename: String = row.get("b");
            assert_eq!(basename, expected, "input={input}");
        }
    }
}
