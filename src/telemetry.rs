//! Telemetry to the Onichip backend.
//!
//! The backend takes `PUT /api/gps/device/<id>/location` with a JSON body of
//! location, vitals and battery state. Payload and request rendering are
//! plain functions so the WiFi and GPRS transports share them byte for byte.

use alloc::format;
use alloc::string::String;

use embassy_net::{Stack, dns::DnsQueryType, tcp::TcpSocket};
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, mutex::Mutex};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;
use log::{info, warn};

use crate::config;
use crate::gps::GpsFix;
use crate::vitals::{BatteryReport, VitalsReport};
use crate::{RX_BUFFER_SIZE, TX_BUFFER_SIZE};

/// HDOP is dimensionless; scaled by the receiver's nominal error it gives
/// the accuracy estimate in metres the backend stores.
const BASE_ACCURACY_M: f32 = 5.0;

#[derive(Debug)]
pub enum Error {
    DnsResolveFailed,
    ConnectionFailed,
    SendFailed,
    NoResponse,
    ServerRejected,
}

pub fn device_location_path() -> String {
    format!("/api/gps/device/{}/location", config::DEVICE_ID)
}

pub fn location_payload(
    fix: &GpsFix,
    vitals: &VitalsReport,
    battery: &BatteryReport,
    charging: bool,
) -> String {
    format!(
        "{{\"location\":{{\"latitude\":{:.6},\"longitude\":{:.6},\"accuracy\":{:.1},\"speed\":{:.1},\"satellites\":{},\"method\":\"GPS\"}},\"vitals\":{{\"heartRate\":{}}},\"battery\":{{\"level\":{},\"charging\":{},\"estimatedHours\":{:.1}}},\"timestamp\":\"{}\"}}",
        fix.latitude,
        fix.longitude,
        fix.hdop * BASE_ACCURACY_M,
        fix.speed_kmh,
        fix.satellites,
        vitals.heart_rate_bpm,
        battery.level,
        charging,
        battery.estimated_hours,
        fix.timestamp,
    )
}

pub fn put_request(path: &str, host: &str, body: &str) -> String {
    format!(
        "PUT {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        path,
        host,
        body.len(),
        body,
    )
}

/// Pulls the status code out of a response, tolerating modem chatter
/// (`SEND OK` and friends) ahead of the status line.
pub fn response_status(text: &str) -> Option<u16> {
    let at = text.find("HTTP/1.")?;
    let line = text[at..].lines().next()?;
    line.split_whitespace().nth(1)?.parse().ok()
}

pub fn response_is_success(text: &str) -> bool {
    matches!(response_status(text), Some(code) if (200..300).contains(&code))
}

pub struct Telemetry {
    stack: &'static Mutex<NoopRawMutex, Stack<'static>>,
    rx_buf: &'static Mutex<NoopRawMutex, [u8; RX_BUFFER_SIZE]>,
    tx_buf: &'static Mutex<NoopRawMutex, [u8; TX_BUFFER_SIZE]>,
}

impl Telemetry {
    pub fn new(
        stack: &'static Mutex<NoopRawMutex, Stack<'static>>,
        rx_buf: &'static Mutex<NoopRawMutex, [u8; RX_BUFFER_SIZE]>,
        tx_buf: &'static Mutex<NoopRawMutex, [u8; TX_BUFFER_SIZE]>,
    ) -> Self {
        Telemetry {
            stack,
            rx_buf,
            tx_buf,
        }
    }

    /// One report over the WiFi stack: resolve, connect, PUT, check the
    /// status line, close.
    pub async fn publish(&mut self, payload: &str) -> Result<(), Error> {
        let stack = self.stack.lock().await;
        let mut tx_buf = self.tx_buf.lock().await;
        let mut rx_buf = self.rx_buf.lock().await;

        let addr = stack
            .dns_query(config::API_HOST, DnsQueryType::A)
            .await
            .map_err(|_| Error::DnsResolveFailed)?
            .first()
            .copied()
            .ok_or(Error::DnsResolveFailed)?;

        let mut socket = TcpSocket::new(*stack, &mut *rx_buf, &mut *tx_buf);
        socket.set_timeout(Some(Duration::from_secs(10)));
        socket
            .connect((addr, config::HTTP_PORT))
            .await
            .map_err(|_| Error::ConnectionFailed)?;

        let request = put_request(&device_location_path(), config::API_HOST, payload);
        let result = Self::exchange(&mut socket, request.as_bytes()).await;

        socket.close();
        // Give stack some time to process the socket closure
        Timer::after(Duration::from_millis(100)).await;

        result
    }

    async fn exchange(socket: &mut TcpSocket<'_>, request: &[u8]) -> Result<(), Error> {
        socket.write_all(request).await.map_err(|e| {
            warn!("Error: {:?}", e);
            Error::SendFailed
        })?;
        socket.flush().await.map_err(|_| Error::SendFailed)?;

        let mut head = [0u8; 256];
        let n = socket.read(&mut head).await.map_err(|_| Error::NoResponse)?;
        if n == 0 {
            return Err(Error::NoResponse);
        }
        let head = core::str::from_utf8(&head[..n]).unwrap_or("");
        match response_status(head) {
            Some(code) if (200..300).contains(&code) => {
                info!("Backend accepted report ({})", code);
                Ok(())
            }
            Some(code) => {
                warn!("Backend rejected report: {}", code);
                Err(Error::ServerRejected)
            }
            None => Err(Error::NoResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::GpsFix;

    fn fix() -> GpsFix {
        GpsFix {
            latitude: 1.5,
            longitude: -78.5,
            satellites: 6,
            hdop: 2.0,
            altitude_m: 2850.0,
            speed_kmh: 3.6,
            course_deg: 90.0,
            timestamp: heapless::String::try_from("2025-08-06T06:27:35Z").unwrap(),
        }
    }

    #[test]
    fn payload_matches_backend_contract() {
        let vitals = VitalsReport { heart_rate_bpm: 96 };
        let battery = BatteryReport {
            millivolts: 3600,
            level: 50,
            estimated_hours: 12.0,
        };
        let payload = location_payload(&fix(), &vitals, &battery, false);
        assert_eq!(
            payload,
            "{\"location\":{\"latitude\":1.500000,\"longitude\":-78.500000,\
             \"accuracy\":10.0,\"speed\":3.6,\"satellites\":6,\"method\":\"GPS\"},\
             \"vitals\":{\"heartRate\":96},\
             \"battery\":{\"level\":50,\"charging\":false,\"estimatedHours\":12.0},\
             \"timestamp\":\"2025-08-06T06:27:35Z\"}"
        );
    }

    #[test]
    fn request_declares_exact_body_length() {
        let req = put_request("/api/gps/device/collar-test/location", "onichip.xyz", "{}");
        assert!(req.starts_with("PUT /api/gps/device/collar-test/location HTTP/1.1\r\n"));
        assert!(req.contains("Host: onichip.xyz\r\n"));
        assert!(req.contains("Content-Length: 2\r\n"));
        assert!(req.ends_with("\r\n\r\n{}"));
    }

    #[test]
    fn path_embeds_device_id() {
        assert_eq!(
            device_location_path(),
            format!("/api/gps/device/{}/location", config::DEVICE_ID)
        );
    }

    #[test]
    fn status_line_parsing() {
        assert_eq!(response_status("HTTP/1.1 200 OK\r\n"), Some(200));
        assert_eq!(response_status("HTTP/1.0 404 Not Found\r\n"), Some(404));
        assert_eq!(
            response_status("SEND OK\r\nHTTP/1.1 201 Created\r\n"),
            Some(201)
        );
        assert_eq!(response_status("CLOSED"), None);

        assert!(response_is_success("HTTP/1.1 204 No Content\r\n"));
        assert!(!response_is_success("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(!response_is_success(""));
    }
}
