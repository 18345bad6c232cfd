//! Pure connection configuration for the rumqttc backend
//!
//! Endpoint validation, option building and QoS conversion. Nothing in here
//! touches the network.

use crate::config::BrokerSection;
use crate::protocol::QoS;
use crate::transport::{BackendError, ConnectRequest};
use rumqttc::v5::{mqttbytes::QoS as MqttQoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;

/// Shortest keep-alive accepted by the broker client
pub const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Largest packet accepted from the broker
pub const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Check that the endpoint can be used to build a client
pub fn validate_endpoint(settings: &BrokerSection) -> Result<(), BackendError> {
    let address = settings.address.trim();
    if address.is_empty() {
        return Err(BackendError::Construction(
            "broker address is empty".to_string(),
        ));
    }
    if address.contains(char::is_whitespace) || address.contains('/') {
        return Err(BackendError::Construction(format!(
            "invalid broker address '{address}'"
        )));
    }
    if settings.port == 0 {
        return Err(BackendError::Construction(
            "broker port must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Keep-alive actually sent to the broker; zero disables it
pub fn effective_keep_alive(requested: Duration) -> Duration {
    if requested.is_zero() {
        requested
    } else {
        requested.max(MIN_KEEP_ALIVE)
    }
}

/// Build rumqttc options for one handshake attempt
pub fn configure_mqtt_options(
    settings: &BrokerSection,
    request: &ConnectRequest,
) -> Result<MqttOptions, BackendError> {
    validate_endpoint(settings)?;

    let mut options = MqttOptions::new(
        request.client_id.clone(),
        settings.address.trim(),
        settings.port,
    );

    if settings.encrypted {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &request.username {
        let password = request.password.clone().unwrap_or_default();
        options.set_credentials(username.clone(), password);
    }

    options.set_keep_alive(effective_keep_alive(request.keep_alive));
    options.set_clean_start(true);
    options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    Ok(options)
}

pub fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

pub fn from_mqtt_qos(qos: MqttQoS) -> QoS {
    match qos {
        MqttQoS::AtMostOnce => QoS::AtMostOnce,
        MqttQoS::AtLeastOnce => QoS::AtLeastOnce,
        MqttQoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConnectRequest {
        ConnectRequest {
            client_id: "brokerlink-test".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let settings = BrokerSection {
            address: " broker.local ".to_string(),
            port: 1884,
            encrypted: false,
        };

        let options = configure_mqtt_options(&settings, &request()).unwrap();

        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "brokerlink-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn test_configure_with_tls_and_credentials() {
        let settings = BrokerSection {
            address: "broker.local".to_string(),
            port: 8883,
            encrypted: true,
        };
        let mut request = request();
        request.username = Some("device".to_string());
        request.password = Some("hunter2".to_string());

        assert!(configure_mqtt_options(&settings, &request).is_ok());
    }

    #[test]
    fn test_invalid_endpoints() {
        let mut settings = BrokerSection::default();

        settings.address = "   ".to_string();
        assert!(matches!(
            validate_endpoint(&settings),
            Err(BackendError::Construction(_))
        ));

        settings.address = "mqtt://broker".to_string();
        assert!(validate_endpoint(&settings).is_err());

        settings.address = "broker".to_string();
        settings.port = 0;
        assert!(configure_mqtt_options(&settings, &request()).is_err());
    }

    #[test]
    fn test_effective_keep_alive() {
        assert_eq!(effective_keep_alive(Duration::ZERO), Duration::ZERO);
        assert_eq!(effective_keep_alive(Duration::from_secs(1)), MIN_KEEP_ALIVE);
        assert_eq!(
            effective_keep_alive(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_qos_conversion() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            assert_eq!(from_mqtt_qos(to_mqtt_qos(qos)), qos);
        }
    }
}
