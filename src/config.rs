use std::env;

/// Everything the process needs from the environment, collected once at
/// startup. A missing variable is fatal: none of the capabilities can run
/// without its endpoint or credential.
#[derive(Clone, Debug)]
pub struct Config {
    pub mongodb_uri: String,
    pub stripe_secret_key: String,
    pub gemini_api_key: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            mongodb_uri: require("MONGODB_URI"),
            stripe_secret_key: require("STRIPE_SECRET_KEY"),
            gemini_api_key: require("GEMINI_API_KEY"),
            port: require("PORT")
                .parse()
                .expect("PORT must be a valid port number"),
        }
    }
}

fn require(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("You need to add {name} to the env"))
}
