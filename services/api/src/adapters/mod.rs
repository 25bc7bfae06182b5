pub mod db;

pub use db::PgProgressStore;
