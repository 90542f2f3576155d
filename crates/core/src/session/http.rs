//! JSON-over-HTTP implementation of the session and payment capabilities.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveTime;
use reqwest::{Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    config::{PaymentSettings, PlatformSettings, Secret},
    error::{PaymentError, SessionError},
    models::{
        PassengerMix, Reservation, ReservationAttempt, SearchCriteria, SeatClass, TrainFamily,
        TrainOption,
    },
};

use super::{
    classify::{
        classify_request_error, classify_unreadable_success, ErrorClassifier, Operation,
    },
    PaymentDispatcher, SessionCapability, SessionResult,
};

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    family: TrainFamily,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    departure: &'a str,
    arrival: &'a str,
    date: String,
    time: String,
    passengers: u32,
    family: TrainFamily,
    include_sold_out: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    trains: Vec<TrainOption>,
}

#[derive(Serialize)]
struct ReserveRequest<'a> {
    train_id: &'a str,
    departs_at: NaiveTime,
    seat_class: SeatClass,
    passengers: PassengerMix,
}

#[derive(Deserialize)]
struct ReservationsResponse {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Card data submitted when paying for a reservation.
#[derive(Debug, Clone)]
pub struct CardDetails {
    number: Secret,
    password: Secret,
    /// Birth date (`YYMMDD`) for personal cards, business registration number otherwise.
    validation: Secret,
    /// Expiry as `YYMM`.
    expiry: Secret,
}

impl CardDetails {
    /// Build card details from the payment section of the configuration.
    pub fn from_settings(settings: &PaymentSettings) -> Option<Self> {
        Some(Self {
            number: settings.card_number.clone()?,
            password: settings.card_password.clone()?,
            validation: settings.card_validation.clone()?,
            expiry: settings.card_expiry.clone()?,
        })
    }

    /// `J` for personal cards (six-digit birth date), `S` for corporate ones.
    pub fn card_kind(&self) -> &'static str {
        if self.validation.expose().len() == 6 {
            "J"
        } else {
            "S"
        }
    }
}

#[derive(Serialize)]
struct PaymentRequest<'a> {
    card_number: &'a str,
    card_password: &'a str,
    validation: &'a str,
    expiry: &'a str,
    card_kind: &'a str,
    installments: u8,
}

/// Shared plumbing between the session and the payment dispatcher.
#[derive(Debug)]
struct Gateway {
    client: Client,
    base_url: String,
    token: Secret,
    classifier: ErrorClassifier,
}

impl Gateway {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(self.token.expose())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> SessionResult<T> {
        let response = request
            .send()
            .await
            .map_err(|err| classify_request_error(&err))?;
        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            return Err(self
                .classifier
                .classify_status(operation, status, &body.message));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| classify_unreadable_success(operation, &err))
    }

    async fn send_empty(&self, operation: Operation, request: RequestBuilder) -> SessionResult<()> {
        let response = request
            .send()
            .await
            .map_err(|err| classify_request_error(&err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body: ErrorBody = response.json().await.unwrap_or_default();
        Err(self
            .classifier
            .classify_status(operation, status, &body.message))
    }
}

/// Logged-in session against a JSON booking gateway.
#[derive(Debug, Clone)]
pub struct HttpSession {
    gateway: Arc<Gateway>,
    family: TrainFamily,
}

impl HttpSession {
    /// Authenticate with the credentials in `settings`.
    pub async fn login(settings: &PlatformSettings) -> SessionResult<Self> {
        let classifier = ErrorClassifier::with_patterns(
            &settings.sold_out_patterns,
            &settings.throttled_patterns,
            &settings.expired_patterns,
        )
        .map_err(|err| SessionError::Fatal(format!("invalid classification pattern: {err}")))?;

        let (username, password) = match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => (username, password),
            _ => {
                return Err(SessionError::Fatal(
                    "platform credentials are not configured".to_string(),
                ))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .gzip(true)
            .build()
            .map_err(|err| SessionError::Fatal(format!("failed to build http client: {err}")))?;

        let mut gateway = Gateway {
            client,
            base_url: settings.base_url.clone(),
            token: Secret::default(),
            classifier,
        };

        let request = gateway
            .client
            .post(gateway.url("login"))
            .json(&LoginRequest {
                username: username.expose(),
                password: password.expose(),
                family: settings.family,
            });
        let login: LoginResponse = gateway.send(Operation::Login, request).await?;
        gateway.token = Secret::from(login.token.as_str());
        info!("logged in to {} gateway at {}", settings.family, settings.base_url);

        Ok(Self {
            gateway: Arc::new(gateway),
            family: settings.family,
        })
    }

    /// Payment dispatcher sharing this session's login.
    pub fn payment_dispatcher(&self, card: CardDetails) -> HttpPaymentDispatcher {
        HttpPaymentDispatcher {
            gateway: Arc::clone(&self.gateway),
            card,
        }
    }

    async fn claim(
        &self,
        operation: Operation,
        path: &str,
        attempt: &ReservationAttempt,
    ) -> SessionResult<Reservation> {
        let request = self
            .gateway
            .request(Method::POST, path)
            .json(&ReserveRequest {
                train_id: &attempt.option.train_id,
                departs_at: attempt.option.departs_at,
                seat_class: attempt.seat_class,
                passengers: attempt.passengers,
            });
        self.gateway.send(operation, request).await
    }
}

#[async_trait]
impl SessionCapability for HttpSession {
    async fn search(
        &self,
        criteria: &SearchCriteria,
        from: NaiveTime,
    ) -> SessionResult<Vec<TrainOption>> {
        debug!(
            "searching {} {} from {}",
            self.family,
            criteria.route_label(),
            from
        );
        let request = self
            .gateway
            .request(Method::POST, "trains/search")
            .json(&SearchRequest {
                departure: &criteria.departure,
                arrival: &criteria.arrival,
                date: criteria.date.format("%Y%m%d").to_string(),
                time: from.format("%H%M%S").to_string(),
                passengers: criteria.passengers.total(),
                family: criteria.family,
                include_sold_out: true,
            });
        let response: SearchResponse = self.gateway.send(Operation::Search, request).await?;
        Ok(response.trains)
    }

    async fn reserve(&self, attempt: &ReservationAttempt) -> SessionResult<Reservation> {
        self.claim(Operation::Reserve, "reservations", attempt).await
    }

    async fn join_waitlist(&self, attempt: &ReservationAttempt) -> SessionResult<Reservation> {
        let mut reservation = self
            .claim(Operation::JoinWaitlist, "reservations/standby", attempt)
            .await?;
        reservation.waitlisted = true;
        Ok(reservation)
    }

    async fn list_reservations(&self) -> SessionResult<Vec<Reservation>> {
        let request = self.gateway.request(Method::GET, "reservations");
        let response: ReservationsResponse = self
            .gateway
            .send(Operation::ListReservations, request)
            .await?;
        Ok(response.reservations)
    }

    async fn cancel(&self, reservation: &Reservation) -> SessionResult<()> {
        let request = self
            .gateway
            .request(Method::DELETE, &format!("reservations/{}", reservation.id));
        self.gateway.send_empty(Operation::Cancel, request).await
    }
}

/// Pays for reservations through the gateway's payment endpoint.
#[derive(Debug, Clone)]
pub struct HttpPaymentDispatcher {
    gateway: Arc<Gateway>,
    card: CardDetails,
}

#[async_trait]
impl PaymentDispatcher for HttpPaymentDispatcher {
    async fn pay(&self, reservation: &Reservation) -> Result<(), PaymentError> {
        let request = self
            .gateway
            .request(
                Method::POST,
                &format!("reservations/{}/payment", reservation.id),
            )
            .json(&PaymentRequest {
                card_number: self.card.number.expose(),
                card_password: self.card.password.expose(),
                validation: self.card.validation.expose(),
                expiry: self.card.expiry.expose(),
                card_kind: self.card.card_kind(),
                installments: 0,
            });
        self.gateway
            .send_empty(Operation::Pay, request)
            .await
            .map_err(PaymentError::from)
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;
    use crate::models::SeatStatus;

    fn card(validation: &str) -> CardDetails {
        CardDetails {
            number: Secret::from("1234567812345678"),
            password: Secret::from("12"),
            validation: Secret::from(validation),
            expiry: Secret::from("2812"),
        }
    }

    #[test]
    fn card_kind_follows_validation_length() {
        assert_eq!(card("900101").card_kind(), "J");
        assert_eq!(card("1234567890").card_kind(), "S");
    }

    #[test]
    fn card_details_require_every_field() {
        let mut settings = PaymentSettings {
            card_number: Some(Secret::from("1234")),
            card_password: Some(Secret::from("12")),
            card_validation: Some(Secret::from("900101")),
            card_expiry: None,
        };
        assert!(CardDetails::from_settings(&settings).is_none());
        settings.card_expiry = Some(Secret::from("2812"));
        assert!(CardDetails::from_settings(&settings).is_some());
    }

    #[test]
    fn card_debug_output_is_redacted() {
        let rendered = format!("{:?}", card("900101"));
        assert!(!rendered.contains("1234567812345678"));
    }

    #[tokio::test]
    async fn login_without_credentials_is_fatal() {
        let settings = PlatformSettings::default();
        let err = HttpSession::login(&settings).await.unwrap_err();
        assert!(err.is_fatal());
    }

    /// Minimal gateway answering every request with `200 OK` and the body
    /// of the first route whose suffix matches the request path.
    async fn canned_gateway(routes: Vec<(&'static str, &'static str)>) -> anyhow::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let routes = Arc::new(routes);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(answer(stream, Arc::clone(&routes)));
            }
        });
        Ok(format!("http://{addr}/api"))
    }

    async fn answer(
        mut stream: TcpStream,
        routes: Arc<Vec<(&'static str, &'static str)>>,
    ) -> std::io::Result<()> {
        let mut buffer = Vec::new();
        loop {
            let header_end = loop {
                if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
                    break pos + 4;
                }
                if !read_more(&mut stream, &mut buffer).await? {
                    return Ok(());
                }
            };
            let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buffer.len() < header_end + length {
                if !read_more(&mut stream, &mut buffer).await? {
                    return Ok(());
                }
            }
            buffer.drain(..header_end + length);

            let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
            let body = routes
                .iter()
                .find(|(route, _)| path.ends_with(route))
                .map(|(_, body)| *body)
                .unwrap_or("{}");
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await?;
        }
    }

    async fn read_more(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> std::io::Result<bool> {
        let mut chunk = [0u8; 1024];
        let read = stream.read(&mut chunk).await?;
        buffer.extend_from_slice(&chunk[..read]);
        Ok(read > 0)
    }

    async fn session_against(routes: Vec<(&'static str, &'static str)>) -> anyhow::Result<HttpSession> {
        let settings = PlatformSettings {
            base_url: canned_gateway(routes).await?,
            username: Some(Secret::from("rider")),
            password: Some(Secret::from("hunter2")),
            request_timeout_secs: 5,
            ..PlatformSettings::default()
        };
        Ok(HttpSession::login(&settings).await?)
    }

    fn attempt() -> ReservationAttempt {
        let departs_at = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        ReservationAttempt {
            option: TrainOption {
                train_id: "301".to_string(),
                departs_at,
                arrives_at: NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
                standard: SeatStatus::Available,
                first: SeatStatus::SoldOut,
                fare: 52_900,
            },
            seat_class: SeatClass::Standard,
            passengers: PassengerMix::default(),
        }
    }

    #[tokio::test]
    async fn accepted_claim_with_unreadable_body_is_fatal() -> anyhow::Result<()> {
        let session = session_against(vec![
            ("/login", r#"{"token":"t"}"#),
            ("/reservations", "HOLD PLACED"),
            ("/reservations/standby", "QUEUED"),
        ])
        .await?;

        let err = session.reserve(&attempt()).await.unwrap_err();
        assert!(err.is_fatal(), "got {err:?}");
        assert!(err.to_string().contains("reservation state unknown"));

        let err = session.join_waitlist(&attempt()).await.unwrap_err();
        assert!(err.is_fatal(), "got {err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_search_body_stays_transient() -> anyhow::Result<()> {
        let session = session_against(vec![
            ("/login", r#"{"token":"t"}"#),
            ("/trains/search", "<html>maintenance</html>"),
        ])
        .await?;

        let criteria = SearchCriteria {
            departure: "Suseo".to_string(),
            arrival: "Busan".to_string(),
            date: chrono::NaiveDate::from_ymd_opt(2099, 1, 15).unwrap(),
            departure_after: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            extra_search_times: Vec::new(),
            passengers: PassengerMix::default(),
            family: TrainFamily::Srt,
        };
        let err = session
            .search(&criteria, criteria.departure_after)
            .await
            .unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn readable_claim_is_returned() -> anyhow::Result<()> {
        let session = session_against(vec![
            ("/login", r#"{"token":"t"}"#),
            (
                "/reservations",
                r#"{"id":"R-1","train_id":"301","departs_at":"09:00:00","seat_class":"standard","seat":"5A","price":52900,"pay_by":null,"waitlisted":false}"#,
            ),
        ])
        .await?;

        let reservation = session.reserve(&attempt()).await?;
        assert_eq!(reservation.id, "R-1");
        assert!(!reservation.waitlisted);
        Ok(())
    }
}
