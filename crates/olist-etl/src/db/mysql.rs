//! MySQL backend

use super::dialect::Dialect;

sqlx_backend! {
    /// Single-connection MySQL backend.
    MySqlDatabase {
        driver: sqlx::MySql,
        arguments: sqlx::mysql::MySqlArguments,
        row: sqlx::mysql::MySqlRow,
        connect_options: sqlx::mysql::MySqlConnectOptions,
        pool_options: sqlx::mysql::MySqlPoolOptions,
        dialect: Dialect::Mysql,
        // unsigned INT columns do not decode as i32
        narrow_int: u32,
    }
}
