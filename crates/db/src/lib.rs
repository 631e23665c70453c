pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, ConnectionSettings, DbPool};
pub use repositories::{
    RepositoryError, SqlActionLogRepository, SqlAdmissionStore, SqlEventHistory,
    SqlRuleRepository,
};
