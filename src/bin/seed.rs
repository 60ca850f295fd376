//! Seed script for development — creates a company and login users.
//!
//! Usage: `cargo run --bin seed`
//!
//! Requires `DATABASE_URL` and `JWT_SECRET` environment variables (reads .env).

use sqlx::PgPool;
use uuid::Uuid;

const ADMIN_PASSWORD: &str = "Test123!";
const OPERATOR_PASSWORD: &str = "operator123";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // Run migrations first
    sqlx::migrate!("./migrations").run(&pool).await?;

    println!("=== ScanForge Seed Script ===");

    let company_id = seed_company(&pool).await?;
    seed_users(&pool, company_id).await?;

    println!("\n=== Seed complete! ===");
    println!("Admin login: admin / {ADMIN_PASSWORD}");
    println!("Operator login: operator / {OPERATOR_PASSWORD}");

    Ok(())
}

async fn seed_company(pool: &PgPool) -> anyhow::Result<Uuid> {
    let existing: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM companies WHERE name = 'Acme Corp'")
            .fetch_optional(pool)
            .await?;

    if let Some(id) = existing {
        println!("[done] Company already present");
        return Ok(id);
    }

    let id: Uuid =
        sqlx::query_scalar("INSERT INTO companies (name) VALUES ('Acme Corp') RETURNING id")
            .fetch_one(pool)
            .await?;
    println!("[done] Created company");
    Ok(id)
}

async fn seed_users(pool: &PgPool, company_id: Uuid) -> anyhow::Result<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = 'admin')")
            .fetch_one(pool)
            .await?;

    let admin_hash = scanforge::services::auth::hash_password(ADMIN_PASSWORD)?;

    if exists {
        sqlx::query("UPDATE users SET password_hash = $1 WHERE username = 'admin'")
            .bind(&admin_hash)
            .execute(pool)
            .await?;
        println!("[done] Updated admin password");
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO users (username, email, password_hash, display_name, company_id, role)
         VALUES ('admin', 'admin@scanforge.local', $1, 'Administrator', $2, 'Admin')",
    )
    .bind(&admin_hash)
    .bind(company_id)
    .execute(pool)
    .await?;

    let operator_hash = scanforge::services::auth::hash_password(OPERATOR_PASSWORD)?;
    sqlx::query(
        "INSERT INTO users (username, email, password_hash, display_name, company_id, role)
         VALUES ('operator', 'operator@scanforge.local', $1, 'Scan Operator', $2, 'Operator')",
    )
    .bind(&operator_hash)
    .bind(company_id)
    .execute(pool)
    .await?;

    println!("[done] Created admin and operator users");
    Ok(())
}
