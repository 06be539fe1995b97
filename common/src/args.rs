use clap::Parser;
use uuid::Uuid;

#[derive(Parser, Debug, Clone)]
pub struct PostgresArgs {
    #[arg(long, env = "INSTANCER_POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,

    #[arg(long, env = "INSTANCER_POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "INSTANCER_POSTGRES_DATABASE", default_value = "postgres")]
    pub postgres_database: String,

    #[arg(long, env = "INSTANCER_POSTGRES_USER", default_value = "postgres")]
    pub postgres_user: String,

    #[arg(long, env = "INSTANCER_POSTGRES_PASSWORD")]
    pub postgres_password: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct RedisArgs {
    #[arg(long, env = "INSTANCER_REDIS_HOST", default_value = "127.0.0.1")]
    pub redis_host: String,

    #[arg(long, env = "INSTANCER_REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    #[arg(long, env = "INSTANCER_REDIS_USERNAME")]
    pub redis_username: Option<String>,

    #[arg(long, env = "INSTANCER_REDIS_PASSWORD")]
    pub redis_password: Option<String>,
}

impl RedisArgs {
    pub fn url_redacted(&self) -> String {
        format!(
            "redis://{}:{}@{}:{}",
            self.redis_username.as_deref().unwrap_or(""),
            self.redis_password.as_deref().map(|_| "****").unwrap_or(""),
            self.redis_host,
            self.redis_port
        )
    }

    pub fn url(&self) -> String {
        let mut url = String::from("redis://");
        if let Some(ref username) = self.redis_username {
            url.push_str(username);
            if let Some(ref password) = self.redis_password {
                url.push(':');
                url.push_str(password);
            }
            url.push('@');
        } else if let Some(ref password) = self.redis_password {
            url.push(':');
            url.push_str(password);
            url.push('@');
        }
        url.push_str(&format!("{}:{}/", self.redis_host, self.redis_port));
        url
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ClusterArgs {
    /// Load in-cluster kubeconfig instead of the local one
    #[arg(long, env = "INSTANCER_IN_CLUSTER", default_value_t = false)]
    pub in_cluster: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct InstancerArgs {
    /// Host teams connect to for exposed TCP ports
    #[arg(long, env = "INSTANCER_CHALLENGE_HOST", default_value = "localhost")]
    pub challenge_host: String,

    /// Team ID granted access to the admin routes
    #[arg(long, env = "INSTANCER_ADMIN_TEAM_ID")]
    pub admin_team_id: Option<Uuid>,

    /// Session lifetime in seconds
    #[arg(long, env = "INSTANCER_SESSION_LENGTH", default_value_t = 24 * 3600)]
    pub session_length: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_url() {
        let args = RedisArgs {
            redis_host: "redis.internal".into(),
            redis_port: 6380,
            redis_username: None,
            redis_password: Some("hunter2".into()),
        };
        assert_eq!(args.url(), "redis://:hunter2@redis.internal:6380/");
        assert!(!args.url_redacted().contains("hunter2"));
    }

    #[test]
    fn test_redis_url_no_auth() {
        let args = RedisArgs {
            redis_host: "127.0.0.1".into(),
            redis_port: 6379,
            redis_username: None,
            redis_password: None,
        };
        assert_eq!(args.url(), "redis://127.0.0.1:6379/");
    }
}
