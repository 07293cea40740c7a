/*
meme-sentinel - Module Organization
*/

// ============================================================================
// CORE SYSTEM MODULES
// ============================================================================
pub mod error_handling;
pub mod store;

// ============================================================================
// MARKET DATA & NOTIFICATION MODULES
// ============================================================================
pub mod change_filter;
pub mod market_data;
pub mod notifier;

// ============================================================================
// TRADING & EXECUTION MODULES
// ============================================================================
pub mod native_mint;
pub mod trader;

// ============================================================================
// MONITOR ENGINE
// ============================================================================
pub mod monitor_engine;
pub mod monitor_service;
