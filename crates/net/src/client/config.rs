use std::time::Duration;

use crate::protocol::DEFAULT_SEND_RATE;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    pub fov: u32,
    pub max_retries: u32,
    /// Movement commands per second.
    pub send_rate: u32,
    pub max_queued_packets: usize,
    pub query_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "Player".to_string(),
            fov: 90,
            max_retries: 3,
            send_rate: DEFAULT_SEND_RATE,
            max_queued_packets: 256,
            query_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn userinfo(&self) -> String {
        format!("\\name\\{}\\fov\\{}", self.name, self.fov)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.send_rate.max(1) as f64)
    }
}
