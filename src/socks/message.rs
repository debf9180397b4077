//! SOCKS5 wire codec
//!
//! Every message is decoded in two phases: a fixed header is read first and
//! the size of the variable tail is derived from header fields. Each message
//! reports its exact encoded length through [`Message::length`].

use super::auth::Credentials;
use super::consts::*;
use super::method::SocksMethod;
use super::types::{SocksCommand, TargetAddr};
use crate::error::{ProtocolError, ReplyCode, SocksError};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A SOCKS5 message with an exact-length encoding
pub trait Message {
    /// Number of bytes this message occupies on the wire
    fn length(&self) -> usize;

    /// Append the encoded message to `buf`
    fn encode(&self, buf: &mut BytesMut);

    /// Encode into a fresh buffer
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.length());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Write a message and flush the stream
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    writer.write_all(&message.to_bytes()).await?;
    writer.flush().await
}

/// Fill `buf` completely, reporting premature EOF as a truncated message
pub(crate) async fn read_exact<R>(
    reader: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), SocksError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::Truncated(what).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Reject a variable-length field that overflows its length byte
pub(crate) fn check_len(field: &'static str, len: usize) -> Result<(), ProtocolError> {
    if len > u8::MAX as usize {
        return Err(ProtocolError::FieldTooLong { field, len });
    }
    Ok(())
}

/// Client greeting
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSelectionMessage {
    methods: Vec<SocksMethod>,
}

impl MethodSelectionMessage {
    /// Create a greeting offering `methods` in client order
    ///
    /// Fails when more than 255 methods are offered.
    pub fn new(methods: Vec<SocksMethod>) -> Result<Self, ProtocolError> {
        check_len("method list", methods.len())?;
        Ok(MethodSelectionMessage { methods })
    }

    /// Offered methods, in client order, duplicates preserved
    pub fn methods(&self) -> &[SocksMethod] {
        &self.methods
    }

    /// Whether the client offered `method`
    pub fn offers(&self, method: SocksMethod) -> bool {
        self.methods.contains(&method)
    }

    /// Decode a greeting from the stream
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, SocksError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 2];
        read_exact(reader, &mut header, "greeting").await?;

        if header[0] != SOCKS5_VERSION {
            return Err(ProtocolError::UnsupportedVersion(header[0]).into());
        }

        let mut methods = vec![0u8; header[1] as usize];
        read_exact(reader, &mut methods, "greeting methods").await?;

        Ok(MethodSelectionMessage {
            methods: methods.into_iter().map(SocksMethod::from_byte).collect(),
        })
    }
}

impl Message for MethodSelectionMessage {
    fn length(&self) -> usize {
        2 + self.methods.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(SOCKS5_VERSION);
        buf.put_u8(self.methods.len() as u8);
        for method in &self.methods {
            buf.put_u8(method.to_byte());
        }
    }
}

/// Server's method choice
///
/// ```text
/// +----+--------+
/// |VER | METHOD |
/// +----+--------+
/// | 1  |   1    |
/// +----+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSelectionReply {
    method: SocksMethod,
}

impl MethodSelectionReply {
    /// Reply selecting `method`
    pub fn new(method: SocksMethod) -> Self {
        MethodSelectionReply { method }
    }

    /// Selected method
    pub fn method(&self) -> SocksMethod {
        self.method
    }

    /// Decode a method selection reply from the stream
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, SocksError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 2];
        read_exact(reader, &mut buf, "method selection reply").await?;

        if buf[0] != SOCKS5_VERSION {
            return Err(ProtocolError::UnsupportedVersion(buf[0]).into());
        }

        Ok(MethodSelectionReply::new(SocksMethod::from_byte(buf[1])))
    }
}

impl Message for MethodSelectionReply {
    fn length(&self) -> usize {
        2
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(SOCKS5_VERSION);
        buf.put_u8(self.method.to_byte());
    }
}

/// Username/password sub-negotiation request (RFC 1929)
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct UsernamePasswordMessage {
    username: String,
    password: String,
}

impl UsernamePasswordMessage {
    /// Create a sub-negotiation request
    ///
    /// Fails when either field is longer than 255 bytes.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let username = username.into();
        let password = password.into();
        check_len("username", username.len())?;
        check_len("password", password.len())?;
        Ok(UsernamePasswordMessage { username, password })
    }

    /// Username field
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password field
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Credentials carried by this request
    pub fn into_credentials(self) -> Credentials {
        Credentials::UsernamePassword {
            username: self.username,
            password: self.password,
        }
    }

    /// Decode a sub-negotiation request from the stream
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, SocksError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 2];
        read_exact(reader, &mut header, "sub-negotiation").await?;

        if header[0] != SOCKS5_AUTH_VERSION {
            return Err(ProtocolError::UnsupportedSubnegotiationVersion(header[0]).into());
        }

        // Username plus the PLEN byte that follows it
        let ulen = header[1] as usize;
        let mut username = vec![0u8; ulen + 1];
        read_exact(reader, &mut username, "username").await?;
        let plen = username.pop().map(usize::from).unwrap_or_default();

        let mut password = vec![0u8; plen];
        read_exact(reader, &mut password, "password").await?;

        let username = String::from_utf8(username).map_err(|_| ProtocolError::InvalidCredentials)?;
        let password = String::from_utf8(password).map_err(|_| ProtocolError::InvalidCredentials)?;

        Ok(UsernamePasswordMessage { username, password })
    }
}

impl Message for UsernamePasswordMessage {
    fn length(&self) -> usize {
        3 + self.username.len() + self.password.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(SOCKS5_AUTH_VERSION);
        buf.put_u8(self.username.len() as u8);
        buf.put_slice(self.username.as_bytes());
        buf.put_u8(self.password.len() as u8);
        buf.put_slice(self.password.as_bytes());
    }
}

impl std::fmt::Debug for UsernamePasswordMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsernamePasswordMessage")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Username/password sub-negotiation reply
///
/// ```text
/// +----+--------+
/// |VER | STATUS |
/// +----+--------+
/// | 1  |   1    |
/// +----+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsernamePasswordReply {
    status: u8,
}

impl UsernamePasswordReply {
    /// Credentials accepted
    pub fn success() -> Self {
        UsernamePasswordReply {
            status: SOCKS5_AUTH_SUCCESS,
        }
    }

    /// Credentials rejected
    pub fn failure() -> Self {
        UsernamePasswordReply {
            status: SOCKS5_AUTH_FAILURE,
        }
    }

    /// Raw status byte
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Whether the status signals success
    pub fn is_success(&self) -> bool {
        self.status == SOCKS5_AUTH_SUCCESS
    }

    /// Decode a sub-negotiation reply from the stream
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, SocksError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 2];
        read_exact(reader, &mut buf, "sub-negotiation reply").await?;

        if buf[0] != SOCKS5_AUTH_VERSION {
            return Err(ProtocolError::UnsupportedSubnegotiationVersion(buf[0]).into());
        }

        Ok(UsernamePasswordReply { status: buf[1] })
    }
}

impl Message for UsernamePasswordReply {
    fn length(&self) -> usize {
        2
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(SOCKS5_AUTH_VERSION);
        buf.put_u8(self.status);
    }
}

/// Command request
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
    command: SocksCommand,
    target: TargetAddr,
}

impl CommandMessage {
    /// Create a command request
    pub fn new(command: SocksCommand, target: TargetAddr) -> Self {
        CommandMessage { command, target }
    }

    /// Requested command
    pub fn command(&self) -> SocksCommand {
        self.command
    }

    /// Destination address
    pub fn target(&self) -> &TargetAddr {
        &self.target
    }

    /// Decode a command request from the stream
    ///
    /// An unknown command byte is reported only after the address has been
    /// consumed, so the caller can still answer with a well-formed reply.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, SocksError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 4];
        read_exact(reader, &mut header, "command request").await?;

        let [version, cmd, _reserved, addr_type] = header;
        if version != SOCKS5_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version).into());
        }

        let target = TargetAddr::read_from(reader, addr_type).await?;
        let command = SocksCommand::from_byte(cmd).ok_or(ProtocolError::CommandNotSupported(cmd))?;

        Ok(CommandMessage { command, target })
    }
}

impl Message for CommandMessage {
    fn length(&self) -> usize {
        3 + self.target.encoded_len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(SOCKS5_VERSION);
        buf.put_u8(self.command.to_byte());
        buf.put_u8(SOCKS5_RESERVED);
        self.target.encode(buf);
    }
}

/// Command reply
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    reply: ReplyCode,
    bind_addr: TargetAddr,
}

impl CommandReply {
    /// Create a reply with an explicit bound address
    pub fn new(reply: ReplyCode, bind_addr: TargetAddr) -> Self {
        CommandReply { reply, bind_addr }
    }

    /// Success reply carrying the bound address
    pub fn success(bind_addr: SocketAddr) -> Self {
        CommandReply::new(ReplyCode::Succeeded, TargetAddr::Ip(bind_addr))
    }

    /// Failure reply with an unspecified bound address
    pub fn failure(reply: ReplyCode) -> Self {
        CommandReply::new(reply, TargetAddr::default())
    }

    /// Status code
    pub fn reply(&self) -> ReplyCode {
        self.reply
    }

    /// Bound address
    pub fn bind_addr(&self) -> &TargetAddr {
        &self.bind_addr
    }

    /// Decode a command reply from the stream
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, SocksError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 4];
        read_exact(reader, &mut header, "command reply").await?;

        let [version, rep, _reserved, addr_type] = header;
        if version != SOCKS5_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version).into());
        }

        let reply = ReplyCode::try_from(rep)?;
        let bind_addr = TargetAddr::read_from(reader, addr_type).await?;

        Ok(CommandReply { reply, bind_addr })
    }
}

impl Message for CommandReply {
    fn length(&self) -> usize {
        3 + self.bind_addr.encoded_len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(SOCKS5_VERSION);
        buf.put_u8(self.reply.into());
        buf.put_u8(SOCKS5_RESERVED);
        self.bind_addr.encode(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::{Ipv4Addr, Ipv6Addr};

    /// Encode, decode back, and check the reported length matches what was consumed
    macro_rules! assert_round_trip {
        ($msg:expr, $ty:ty) => {{
            let msg = $msg;
            let bytes = msg.to_bytes();
            assert_eq!(bytes.len(), msg.length());

            let mut cursor = Cursor::new(bytes.to_vec());
            let decoded = <$ty>::read_from(&mut cursor).await.unwrap();
            assert_eq!(decoded, msg);
            assert_eq!(cursor.position() as usize, decoded.length());
        }};
    }

    #[tokio::test]
    async fn test_round_trip_every_message_kind() {
        assert_round_trip!(
            MethodSelectionMessage::new(vec![
                SocksMethod::NoAuth,
                SocksMethod::UsernamePassword,
                SocksMethod::NoAuth,
                SocksMethod::Other(0x80),
            ])
            .unwrap(),
            MethodSelectionMessage
        );
        assert_round_trip!(
            MethodSelectionReply::new(SocksMethod::NoAcceptable),
            MethodSelectionReply
        );
        assert_round_trip!(
            UsernamePasswordMessage::new("admin", "secret123").unwrap(),
            UsernamePasswordMessage
        );
        assert_round_trip!(UsernamePasswordReply::failure(), UsernamePasswordReply);
        assert_round_trip!(
            CommandMessage::new(
                SocksCommand::Connect,
                TargetAddr::domain("example.com", 443).unwrap()
            ),
            CommandMessage
        );
        assert_round_trip!(
            CommandMessage::new(
                SocksCommand::UdpAssociate,
                TargetAddr::ipv6(Ipv6Addr::LOCALHOST, 53)
            ),
            CommandMessage
        );
        assert_round_trip!(
            CommandReply::success("10.0.0.1:9090".parse().unwrap()),
            CommandReply
        );
        assert_round_trip!(
            CommandReply::failure(ReplyCode::HostUnreachable),
            CommandReply
        );
    }

    #[tokio::test]
    async fn test_greeting_leaves_trailing_bytes() {
        // Greeting followed by the start of a sub-negotiation
        let mut cursor = Cursor::new(vec![0x05, 0x02, 0x00, 0x02, 0x01, 0x04]);
        let greeting = MethodSelectionMessage::read_from(&mut cursor).await.unwrap();

        assert_eq!(
            greeting.methods(),
            &[SocksMethod::NoAuth, SocksMethod::UsernamePassword]
        );
        assert_eq!(cursor.position(), 4);
    }

    #[tokio::test]
    async fn test_greeting_with_no_methods() {
        let mut cursor = Cursor::new(vec![0x05, 0x00]);
        let greeting = MethodSelectionMessage::read_from(&mut cursor).await.unwrap();
        assert!(greeting.methods().is_empty());
        assert_eq!(greeting.length(), 2);
    }

    #[tokio::test]
    async fn test_greeting_invalid_version() {
        let mut cursor = Cursor::new(vec![0x04, 0x01, 0x00]);
        let err = MethodSelectionMessage::read_from(&mut cursor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SocksError::Protocol(ProtocolError::UnsupportedVersion(4))
        ));
    }

    #[tokio::test]
    async fn test_greeting_premature_eof() {
        // Declares three methods, delivers one
        let mut cursor = Cursor::new(vec![0x05, 0x03, 0x00]);
        let err = MethodSelectionMessage::read_from(&mut cursor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SocksError::Protocol(ProtocolError::Truncated("greeting methods"))
        ));
    }

    #[tokio::test]
    async fn test_subnegotiation_decode() {
        let mut data = vec![SOCKS5_AUTH_VERSION, 4];
        data.extend_from_slice(b"user");
        data.push(4);
        data.extend_from_slice(b"pass");
        let mut cursor = Cursor::new(data);

        let msg = UsernamePasswordMessage::read_from(&mut cursor).await.unwrap();
        assert_eq!(msg.username(), "user");
        assert_eq!(msg.password(), "pass");
        assert_eq!(msg.length(), 11);
    }

    #[tokio::test]
    async fn test_subnegotiation_invalid_version() {
        let mut cursor = Cursor::new(vec![0x05, 1, b'u', 1, b'p']);
        let err = UsernamePasswordMessage::read_from(&mut cursor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SocksError::Protocol(ProtocolError::UnsupportedSubnegotiationVersion(5))
        ));
    }

    #[tokio::test]
    async fn test_subnegotiation_truncated_password() {
        let mut cursor = Cursor::new(vec![SOCKS5_AUTH_VERSION, 1, b'u', 8, b'p']);
        let err = UsernamePasswordMessage::read_from(&mut cursor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SocksError::Protocol(ProtocolError::Truncated("password"))
        ));
    }

    #[test]
    fn test_oversized_fields_rejected() {
        let long = "x".repeat(256);
        assert_eq!(
            UsernamePasswordMessage::new(long.as_str(), "pw").unwrap_err(),
            ProtocolError::FieldTooLong {
                field: "username",
                len: 256
            }
        );
        assert_eq!(
            UsernamePasswordMessage::new("admin", long.as_str()).unwrap_err(),
            ProtocolError::FieldTooLong {
                field: "password",
                len: 256
            }
        );
        assert!(UsernamePasswordMessage::new("x".repeat(255), "x".repeat(255)).is_ok());

        assert_eq!(
            MethodSelectionMessage::new(vec![SocksMethod::NoAuth; 256]).unwrap_err(),
            ProtocolError::FieldTooLong {
                field: "method list",
                len: 256
            }
        );
        let greeting = MethodSelectionMessage::new(vec![SocksMethod::NoAuth; 255]).unwrap();
        assert_eq!(greeting.length(), 257);
    }

    #[test]
    fn test_subnegotiation_debug_hides_password() {
        let msg = UsernamePasswordMessage::new("admin", "hunter2").unwrap();
        let debug = format!("{:?}", msg);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_command_request_ipv4() {
        let mut cursor = Cursor::new(vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_IPV4,
            127,
            0,
            0,
            1,
            0x1F,
            0x90,
        ]);

        let request = CommandMessage::read_from(&mut cursor).await.unwrap();
        assert_eq!(request.command(), SocksCommand::Connect);
        assert_eq!(
            request.target(),
            &TargetAddr::ipv4(Ipv4Addr::LOCALHOST, 8080)
        );
        assert_eq!(request.length(), 10);
    }

    #[tokio::test]
    async fn test_command_request_unknown_command_consumes_address() {
        let mut cursor = Cursor::new(vec![
            SOCKS5_VERSION,
            0x09,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_IPV4,
            127,
            0,
            0,
            1,
            0,
            80,
        ]);

        let err = CommandMessage::read_from(&mut cursor).await.unwrap_err();
        assert!(matches!(
            err,
            SocksError::Protocol(ProtocolError::CommandNotSupported(0x09))
        ));
        assert_eq!(cursor.position(), 10);
    }

    #[tokio::test]
    async fn test_command_reply_unknown_code() {
        let mut cursor = Cursor::new(vec![SOCKS5_VERSION, 0x42, 0, 1, 0, 0, 0, 0, 0, 0]);
        let err = CommandReply::read_from(&mut cursor).await.unwrap_err();
        assert!(matches!(
            err,
            SocksError::Protocol(ProtocolError::UnknownReplyCode(0x42))
        ));
    }

    #[test]
    fn test_failure_reply_bytes() {
        let bytes = CommandReply::failure(ReplyCode::ConnectionRefused).to_bytes();
        assert_eq!(
            &bytes[..],
            &[
                SOCKS5_VERSION,
                0x05,
                SOCKS5_RESERVED,
                SOCKS5_ADDR_TYPE_IPV4,
                0,
                0,
                0,
                0,
                0,
                0
            ]
        );
    }

    #[tokio::test]
    async fn test_write_message_flushes_exact_bytes() {
        let mut stream = tokio_test::io::Builder::new()
            .write(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_PASSWORD])
            .build();

        write_message(
            &mut stream,
            &MethodSelectionReply::new(SocksMethod::UsernamePassword),
        )
        .await
        .unwrap();
    }
}
