use std::time::Duration;

/// What the platform knows about the current link
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetworkProfile {
    pub downlink_kbps: Option<u32>,
    pub rtt_ms: Option<u32>,
    pub save_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTier {
    Constrained,
    Standard,
    Fast,
}

impl NetworkProfile {
    pub fn tier(&self) -> NetworkTier {
        let slow_link = self.downlink_kbps.is_some_and(|kbps| kbps < 1_500);
        let high_rtt = self.rtt_ms.is_some_and(|rtt| rtt > 300);
        if self.save_data || slow_link || high_rtt {
            return NetworkTier::Constrained;
        }

        let fast_link = self.downlink_kbps.is_some_and(|kbps| kbps >= 8_000);
        let low_rtt = self.rtt_ms.is_some_and(|rtt| rtt <= 80);
        if fast_link && low_rtt {
            NetworkTier::Fast
        } else {
            NetworkTier::Standard
        }
    }
}

/// Engine settings adapted to the link. Slow links get a short buffer and
/// quick load timeouts so a stalled fragment is abandoned early.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineTunables {
    pub tier: NetworkTier,
    pub max_buffer: Duration,
    pub fragment_load_timeout: Duration,
    pub manifest_load_timeout: Duration,
    pub low_latency: bool,
}

impl EngineTunables {
    pub fn for_profile(profile: &NetworkProfile) -> Self {
        let tier = profile.tier();
        let (buffer_secs, fragment_secs, manifest_secs) = match tier {
            NetworkTier::Constrained => (10, 8, 6),
            NetworkTier::Standard => (20, 12, 10),
            NetworkTier::Fast => (30, 20, 10),
        };
        Self {
            tier,
            max_buffer: Duration::from_secs(buffer_secs),
            fragment_load_timeout: Duration::from_secs(fragment_secs),
            manifest_load_timeout: Duration::from_secs(manifest_secs),
            low_latency: tier != NetworkTier::Constrained,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers() {
        let unknown = NetworkProfile::default();
        assert_eq!(unknown.tier(), NetworkTier::Standard);

        let save_data = NetworkProfile {
            save_data: true,
            ..Default::default()
        };
        assert_eq!(save_data.tier(), NetworkTier::Constrained);

        let satellite = NetworkProfile {
            downlink_kbps: Some(20_000),
            rtt_ms: Some(600),
            save_data: false,
        };
        assert_eq!(satellite.tier(), NetworkTier::Constrained);

        let fiber = NetworkProfile {
            downlink_kbps: Some(50_000),
            rtt_ms: Some(15),
            save_data: false,
        };
        assert_eq!(fiber.tier(), NetworkTier::Fast);
    }

    #[test]
    fn test_slow_links_get_shorter_timeouts() {
        let slow = EngineTunables::for_profile(&NetworkProfile {
            downlink_kbps: Some(800),
            rtt_ms: Some(120),
            save_data: false,
        });
        let fast = EngineTunables::for_profile(&NetworkProfile {
            downlink_kbps: Some(12_000),
            rtt_ms: Some(40),
            save_data: false,
        });

        assert!(slow.max_buffer < fast.max_buffer);
        assert!(slow.fragment_load_timeout < fast.fragment_load_timeout);
        assert!(!slow.low_latency);
    }
}
