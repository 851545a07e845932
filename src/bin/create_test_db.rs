use std::error::Error;
use std::path::Path;
use std::process::exit;

use clap::Parser;
use rusqlite::Connection;

use moneyflow_rs::{PasswordHash, ValidatedPassword, create_user, initialize_db, now_utc};

/// A utility for creating a test database for the moneyflow_rs API server.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to save the SQLite database to.
    #[arg(long, short)]
    output_path: String,

    /// The base currency the ledger is seeded with.
    #[arg(long, default_value = "USD")]
    base_currency: String,
}

/// Create and populate a database for manual testing.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let output_path = Path::new(&args.output_path);

    match output_path.extension() {
        Some(extension) if !extension.is_empty() => {}
        _ => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
    }

    if output_path.is_file() {
        eprintln!("File already exists at {output_path:#?}!");
        exit(1);
    }

    println!("Creating database at {output_path:#?}");
    let conn = Connection::open(output_path)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    initialize_db(&conn, &args.base_currency.to_uppercase())?;

    println!("Creating test user \"test\"...");

    let password_hash = PasswordHash::new(
        ValidatedPassword::new_unchecked("test"),
        PasswordHash::DEFAULT_COST,
    )?;
    create_user("test", password_hash, now_utc(), &conn)?;

    println!("Success!");

    Ok(())
}
