use clap::Args;
use std::time::Duration;

/// Connection settings for the M-Pesa Daraja API.
///
/// Every field can come from the command line or from the matching `MPESA_*`
/// environment variable.
#[derive(Args, Debug, Clone)]
pub struct MpesaConfig {
    #[arg(
        long,
        global = true,
        env = "MPESA_AUTH_URL",
        default_value = "https://sandbox.safaricom.co.ke/oauth/v1/generate?grant_type=client_credentials"
    )]
    pub auth_url: String,

    #[arg(
        long,
        global = true,
        env = "MPESA_STK_URL",
        default_value = "https://sandbox.safaricom.co.ke/mpesa/stkpush/v1/processrequest"
    )]
    pub stk_url: String,

    #[arg(
        long,
        global = true,
        env = "MPESA_QUERY_URL",
        default_value = "https://sandbox.safaricom.co.ke/mpesa/stkpushquery/v1/query"
    )]
    pub query_url: String,

    #[arg(long, global = true, env = "MPESA_SHORTCODE", default_value = "")]
    pub shortcode: String,

    #[arg(long, global = true, env = "MPESA_PASSKEY", default_value = "", hide_env_values = true)]
    pub passkey: String,

    #[arg(long, global = true, env = "MPESA_CONSUMER_KEY", default_value = "", hide_env_values = true)]
    pub consumer_key: String,

    #[arg(long, global = true, env = "MPESA_CONSUMER_SECRET", default_value = "", hide_env_values = true)]
    pub consumer_secret: String,

    #[arg(long, global = true, env = "MPESA_CALLBACK_URL", default_value = "")]
    pub callback_url: String,

    /// Timeout for a single gateway request, in seconds.
    #[arg(long, global = true, env = "MPESA_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

impl MpesaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Client-side polling settings.
#[derive(Args, Debug, Clone, Copy)]
pub struct PollConfig {
    /// Delay between two status checks, in seconds.
    #[arg(long, default_value_t = 3)]
    pub interval_secs: u64,

    /// Number of status checks before giving up.
    #[arg(long, default_value_t = 20)]
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            max_attempts: 20,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
