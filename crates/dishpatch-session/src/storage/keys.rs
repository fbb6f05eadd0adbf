//! Storage key names.
//!
//! Durable keys live in the long-lived store and are wiped by termination.
//! Staged keys live in a separate store with a one-shot lifetime.

/// Short-lived bearer token.
pub const ACCESS_TOKEN: &str = "access_token";

/// Long-lived token used only to mint new access tokens.
pub const REFRESH_TOKEN: &str = "refresh_token";

/// Cached account record of the signed-in user.
pub const USER: &str = "user";

pub const CUSTOMER_PROFILE: &str = "customer_profile";
pub const VENDOR_PROFILE: &str = "vendor_profile";
pub const COURIER_PROFILE: &str = "courier_profile";

/// Shopping cart of the signed-in customer.
pub const CART: &str = "cart";

/// In-progress vendor / courier signup applications.
pub const VENDOR_APPLICATION: &str = "vendor_application";
pub const COURIER_APPLICATION: &str = "courier_application";

/// Every durable key tied to the authenticated identity.
pub const SESSION_KEYS: &[&str] = &[
    ACCESS_TOKEN,
    REFRESH_TOKEN,
    USER,
    CUSTOMER_PROFILE,
    VENDOR_PROFILE,
    COURIER_PROFILE,
    CART,
    VENDOR_APPLICATION,
    COURIER_APPLICATION,
];

/// One-shot message shown by the next login screen.
pub const REDIRECT_MESSAGE: &str = "redirect_message";

/// Path to return to after the user signs in again.
pub const RETURN_PATH: &str = "redirect_after_login";
