//! Account-row access for the login node.
//!
//! The only database consumer in the cluster: credential material on logon,
//! tutorial flags on save. Queries run on sqlx's pool and never block the
//! accept loop.

use anyhow::Result;
use sqlx::MySqlPool;

use super::AccountRow;

/// Fetch the SRP material for an account, if it exists.
pub async fn fetch_account(pool: &MySqlPool, name: &str) -> Result<Option<AccountRow>> {
    let row: Option<(u32, String, String)> = sqlx::query_as(
        "SELECT `AccId`, `AccSalt`, `AccVerifier` FROM `Account` WHERE `AccName` = ?",
    )
    .bind(name.to_uppercase())
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(account_id, salt_hex, verifier_hex)| {
        let salt = hex::decode(salt_hex).ok()?;
        let verifier = hex::decode(verifier_hex).ok()?;
        Some(AccountRow {
            account_id,
            salt,
            verifier,
        })
    }))
}

/// Persist the tutorial bitfield. Fire and forget; a failed save only logs.
pub async fn save_tutorial_flags(pool: &MySqlPool, account_id: u32, flags: &[u32; 8]) {
    let packed: String = flags
        .iter()
        .map(|f| format!("{:08x}", f))
        .collect::<Vec<_>>()
        .join("");
    let result = sqlx::query("UPDATE `Account` SET `AccTutorial` = ? WHERE `AccId` = ?")
        .bind(packed)
        .bind(account_id)
        .execute(pool)
        .await;
    if let Err(e) = result {
        tracing::error!("[login] [tutorial_save_failed] account={} err={}", account_id, e);
    }
}

/// Stamp the account's last seen address on logon. Fire and forget.
pub async fn update_last_ip(pool: &MySqlPool, account_id: u32, ip: &str) {
    let result = sqlx::query("UPDATE `Account` SET `AccLastIp` = ? WHERE `AccId` = ?")
        .bind(ip)
        .bind(account_id)
        .execute(pool)
        .await;
    if let Err(e) = result {
        tracing::error!("[login] [last_ip_save_failed] account={} err={}", account_id, e);
    }
}
