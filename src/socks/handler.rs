//! Session driver
//!
//! Runs one client connection through the SOCKS5 state machine:
//!
//! 1. Greeting and method selection
//! 2. Sub-negotiation (if the method requires it)
//! 3. Command request and execution
//! 4. Relay until either side closes
//!
//! Every failure ends the session. The only bytes sent on failure are the
//! ones the protocol mandates: method 0xFF, sub-negotiation status 0x01, or
//! a command reply carrying the failure code.

use super::auth::Credentials;
use super::command::CommandOutcome;
use super::message::{
    write_message, CommandMessage, CommandReply, MethodSelectionMessage, MethodSelectionReply,
    UsernamePasswordMessage, UsernamePasswordReply,
};
use super::method::SocksMethod;
use super::pipe::Pipe;
use super::session::{Session, SessionState};
use super::SocksService;
use crate::error::{AuthError, SocksError};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Bound a handshake read by `timeout`
async fn read_within<T, F>(timeout: Duration, what: &str, read: F) -> Result<T, SocksError>
where
    F: Future<Output = Result<T, SocksError>>,
{
    match tokio::time::timeout(timeout, read).await {
        Ok(result) => result,
        Err(_) => Err(SocksError::Timeout(format!(
            "{} not received within {:?}",
            what, timeout
        ))),
    }
}

/// Drive `session` over `stream` until the connection is finished
///
/// The session is left in [`SessionState::Closed`] on every exit path.
pub async fn drive_session<S>(
    service: &SocksService,
    session: &mut Session,
    mut stream: S,
) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let result = match run_session(service, session, &mut stream).await {
        Ok(outcome) => relay(service, session, stream, outcome).await,
        Err(e) => Err(e),
    };
    session.close();
    result
}

/// Handshake and command phases; returns the resource to relay
async fn run_session<S>(
    service: &SocksService,
    session: &mut Session,
    stream: &mut S,
) -> Result<CommandOutcome, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let timeout = service.handshake_timeout();

    // Step 1: Greeting and method selection
    let greeting =
        read_within(timeout, "greeting", MethodSelectionMessage::read_from(stream)).await?;
    let method = service.selector().select(&greeting);
    write_message(stream, &MethodSelectionReply::new(method)).await?;

    if method == SocksMethod::NoAcceptable {
        return Err(AuthError::NoAcceptableMethod.into());
    }
    session.set_method(method)?;
    debug!(%method, "Method selected");

    // Step 2: Authentication
    authenticate(service, session, stream, method).await?;
    session.advance(SessionState::Authenticated)?;

    // Step 3: Command request
    let request = match read_within(
        timeout,
        "command request",
        CommandMessage::read_from(stream),
    )
    .await
    {
        Ok(request) => request,
        Err(SocksError::Protocol(e)) => {
            if let Some(code) = e.reply_code() {
                write_message(stream, &CommandReply::failure(code)).await?;
            }
            return Err(e.into());
        }
        Err(e) => return Err(e),
    };
    session.advance(SessionState::CommandReceived)?;
    info!("SOCKS5 {} request to {}", request.command(), request.target());

    // Step 4: Execution
    let outcome = match service.executor().execute(&request, session, stream).await {
        Ok(outcome) => outcome,
        Err(SocksError::Command(e)) => {
            write_message(stream, &CommandReply::failure(e.reply())).await?;
            return Err(e.into());
        }
        Err(e) => return Err(e),
    };
    session.advance(SessionState::Relaying)?;

    Ok(outcome)
}

async fn authenticate<S>(
    service: &SocksService,
    session: &mut Session,
    stream: &mut S,
    method: SocksMethod,
) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let authenticator = service
        .authenticators()
        .get(method)
        .ok_or(AuthError::NoAuthenticator(method))?;

    if !method.requires_authentication() {
        authenticator
            .authenticate(&Credentials::None, session)
            .await?;
        return Ok(());
    }

    session.advance(SessionState::Authenticating)?;

    let credentials = match method {
        SocksMethod::UsernamePassword => read_within(
            service.handshake_timeout(),
            "sub-negotiation",
            UsernamePasswordMessage::read_from(stream),
        )
        .await?
        .into_credentials(),
        other => return Err(AuthError::NoAuthenticator(other).into()),
    };

    match authenticator.authenticate(&credentials, session).await {
        Ok(()) => {
            write_message(stream, &UsernamePasswordReply::success()).await?;
            Ok(())
        }
        Err(e) => {
            write_message(stream, &UsernamePasswordReply::failure()).await?;
            Err(e.into())
        }
    }
}

async fn relay<S>(
    service: &SocksService,
    session: &Session,
    mut stream: S,
    outcome: CommandOutcome,
) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match outcome {
        CommandOutcome::Tunnel(destination) => {
            let pipe = service.initialize_pipe(Pipe::new(stream, destination));
            let summary = pipe.run().await;
            info!(
                user = session.attribute(super::session::USER_KEY).unwrap_or("-"),
                upstream = summary.upstream_bytes,
                downstream = summary.downstream_bytes,
                cause = %summary.cause,
                "Tunnel closed"
            );
            Ok(())
        }
        CommandOutcome::UdpAssociation(association) => {
            association.run(&mut stream).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SocksConfig, UserConfig};
    use crate::error::{ProtocolError, ReplyCode};
    use crate::socks::consts::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_session() -> Session {
        Session::new(
            1,
            "127.0.0.1:50000".parse().unwrap(),
            "127.0.0.1:1080".parse().unwrap(),
        )
    }

    fn password_service() -> SocksService {
        SocksService::from_config(&SocksConfig {
            methods: vec![SocksMethod::UsernamePassword],
            users: vec![UserConfig {
                username: "alice".to_string(),
                password: "wonderland".to_string(),
            }],
            ..Default::default()
        })
        .unwrap()
    }

    fn sub_negotiation(username: &str, password: &str) -> Vec<u8> {
        let mut data = vec![SOCKS5_AUTH_VERSION, username.len() as u8];
        data.extend_from_slice(username.as_bytes());
        data.push(password.len() as u8);
        data.extend_from_slice(password.as_bytes());
        data
    }

    #[tokio::test]
    async fn test_no_acceptable_method() {
        let service = SocksService::from_config(&SocksConfig::default()).unwrap();
        let (mut client, server) = duplex(1024);
        let mut session = test_session();

        client
            .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_PASSWORD])
            .await
            .unwrap();

        let err = drive_session(&service, &mut session, server)
            .await
            .unwrap_err();
        assert!(matches!(err, SocksError::Auth(AuthError::NoAcceptableMethod)));
        assert!(session.is_closed());
        assert_eq!(session.method(), None);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, vec![SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE]);
    }

    #[tokio::test]
    async fn test_empty_method_list_is_no_acceptable() {
        let service = SocksService::from_config(&SocksConfig::default()).unwrap();
        let (mut client, server) = duplex(1024);
        let mut session = test_session();

        client.write_all(&[SOCKS5_VERSION, 0]).await.unwrap();
        assert!(drive_session(&service, &mut session, server).await.is_err());

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, vec![SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE]);
    }

    #[tokio::test]
    async fn test_bad_version_closes_without_reply() {
        let service = SocksService::from_config(&SocksConfig::default()).unwrap();
        let (mut client, server) = duplex(1024);
        let mut session = test_session();

        client.write_all(&[0x04, 1, 0]).await.unwrap();
        let err = drive_session(&service, &mut session, server)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SocksError::Protocol(ProtocolError::UnsupportedVersion(4))
        ));

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_password_never_reads_command() {
        let service = password_service();
        let (mut client, server) = duplex(1024);
        let mut session = test_session();

        client
            .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_PASSWORD])
            .await
            .unwrap();
        client
            .write_all(&sub_negotiation("alice", "wrong"))
            .await
            .unwrap();
        // A command request that must never be consumed
        client
            .write_all(&[
                SOCKS5_VERSION,
                SOCKS5_CMD_TCP_CONNECT,
                0,
                SOCKS5_ADDR_TYPE_IPV4,
                127,
                0,
                0,
                1,
                0,
                80,
            ])
            .await
            .unwrap();

        let err = drive_session(&service, &mut session, server)
            .await
            .unwrap_err();
        assert!(matches!(err, SocksError::Auth(AuthError::Rejected(_))));
        assert!(session.user().is_none());

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(
            reply,
            vec![
                SOCKS5_VERSION,
                SOCKS5_AUTH_METHOD_PASSWORD,
                SOCKS5_AUTH_VERSION,
                SOCKS5_AUTH_FAILURE
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_command_gets_reply() {
        let service = password_service();
        let (mut client, server) = duplex(1024);
        let mut session = test_session();

        client
            .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_PASSWORD])
            .await
            .unwrap();
        client
            .write_all(&sub_negotiation("alice", "wonderland"))
            .await
            .unwrap();
        client
            .write_all(&[SOCKS5_VERSION, 0x09, 0, SOCKS5_ADDR_TYPE_IPV4, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let err = drive_session(&service, &mut session, server)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SocksError::Protocol(ProtocolError::CommandNotSupported(0x09))
        ));
        assert_eq!(session.attribute(crate::socks::USER_KEY), Some("alice"));

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(&reply[..4], &[SOCKS5_VERSION, 0x02, SOCKS5_AUTH_VERSION, 0x00]);
        assert_eq!(&reply[4..6], &[SOCKS5_VERSION, u8::from(ReplyCode::CommandNotSupported)]);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let service = SocksService::from_config(&SocksConfig {
            handshake_timeout: 1,
            ..Default::default()
        })
        .unwrap();
        let (mut client, server) = duplex(1024);
        let mut session = test_session();

        // Partial greeting, then silence
        client.write_all(&[SOCKS5_VERSION, 2]).await.unwrap();

        let err = drive_session(&service, &mut session, server)
            .await
            .unwrap_err();
        assert!(matches!(err, SocksError::Timeout(_)));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_connect_and_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (mut r, mut w) = stream.split();
            let _ = tokio::io::copy(&mut r, &mut w).await;
        });

        let service = SocksService::from_config(&SocksConfig::default()).unwrap();
        let (mut client, server) = duplex(1024);

        let driver = tokio::spawn(async move {
            let mut session = test_session();
            let result = drive_session(&service, &mut session, server).await;
            (result, session.state())
        });

        client
            .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE])
            .await
            .unwrap();
        let mut selection = [0u8; 2];
        client.read_exact(&mut selection).await.unwrap();
        assert_eq!(selection, [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE]);

        let mut request = vec![SOCKS5_VERSION, SOCKS5_CMD_TCP_CONNECT, 0, SOCKS5_ADDR_TYPE_IPV4];
        request.extend_from_slice(&[127, 0, 0, 1]);
        request.extend_from_slice(&echo_addr.port().to_be_bytes());
        client.write_all(&request).await.unwrap();

        let reply = CommandReply::read_from(&mut client).await.unwrap();
        assert_eq!(reply.reply(), ReplyCode::Succeeded);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        let (result, state) = driver.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(state, SessionState::Closed);
    }
}
