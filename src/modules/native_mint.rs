//! Canonicalization of the native SOL mint address.
//!
//! Jupiter only accepts `So11111111111111111111111111111111111111112`; the
//! legacy alias ending in `...111` still shows up in user input, so every
//! outbound market-data and trade call goes through [`normalize_native_mint`].

/// Canonical wrapped-SOL mint.
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";

/// Legacy alias some wallets and older tooling still emit.
pub const NATIVE_MINT_ALIAS: &str = "So11111111111111111111111111111111111111111";

pub fn normalize_native_mint(address: &str) -> &str {
    if address == NATIVE_MINT_ALIAS {
        NATIVE_MINT
    } else {
        address
    }
}

/// True when the address refers to native SOL (either spelling).
pub fn is_native_mint(address: &str) -> bool {
    normalize_native_mint(address) == NATIVE_MINT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_maps_to_canonical_mint() {
        assert_eq!(normalize_native_mint(NATIVE_MINT_ALIAS), NATIVE_MINT);
    }

    #[test]
    fn normalize_is_idempotent() {
        for addr in [
            NATIVE_MINT,
            NATIVE_MINT_ALIAS,
            "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263",
        ] {
            let once = normalize_native_mint(addr);
            assert_eq!(normalize_native_mint(once), once);
        }
    }

    #[test]
    fn other_addresses_pass_through() {
        let bonk = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";
        assert_eq!(normalize_native_mint(bonk), bonk);
        assert!(!is_native_mint(bonk));
        assert!(is_native_mint(NATIVE_MINT_ALIAS));
    }
}
