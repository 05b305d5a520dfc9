//! Helpers behind the `superfan-cli` subcommands.

use anyhow::{Context, Result};
use serde::Serialize;
use superfan_core::{CampaignId, CartItem, ClubId, IdempotencyKey, UserId};
use superfan_economics::cart_key_fields;

/// The key `cart_checkout` derives when the client sends none
pub fn derive_cart_key(scope: &str, user: &str, club: &str, campaign: &str, items_json: &str) -> Result<IdempotencyKey> {
    let items: Vec<CartItem> = serde_json::from_str(items_json).context("parsing --items")?;
    let fields = cart_key_fields(
        &UserId::new(user),
        &ClubId::new(club),
        &CampaignId::new(campaign),
        &items,
    );
    Ok(IdempotencyKey::derive(scope, &fields)?)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
