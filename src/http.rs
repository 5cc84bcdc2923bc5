/// HTTP 请求/响应数据模型
///
/// 解析器直接在字节缓冲区上工作，输入可能只是一次或几次读取得到的
/// 不完整数据：请求头之后跟着多少字节就算作多少 body
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// 请求头结束标志
pub const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";

/// 查找请求头结束位置，返回分隔符之后的偏移
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_DELIMITER.len())
        .position(|w| w == HEADER_DELIMITER)
        .map(|pos| pos + HEADER_DELIMITER.len())
}

/// 解析后的入站请求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    /// 头名称区分大小写，重复的名称以最后一次出现为准
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpRequest {
    /// 解析原始请求字节
    ///
    /// 不做任何校验：请求行残缺时对应字段为空，没有 `:` 的头部行直接跳过
    pub fn parse(raw: &[u8]) -> Self {
        let mut req = HttpRequest::default();
        let mut lines = Lines::new(raw);

        let Some(request_line) = lines.next_line() else {
            return req;
        };
        let mut parts = request_line
            .split(|b| b.is_ascii_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned());
        req.method = parts.next().unwrap_or_default();
        req.target = parts.next().unwrap_or_default();
        req.version = parts.next().unwrap_or_default();

        while let Some(line) = lines.next_line() {
            if line.is_empty() {
                break;
            }
            let Some(colon) = line.iter().position(|&b| b == b':') else {
                continue;
            };
            let name = String::from_utf8_lossy(&line[..colon]).into_owned();
            let value = &line[colon + 1..];
            let start = value
                .iter()
                .position(|&b| b != b' ' && b != b'\t')
                .unwrap_or(value.len());
            req.headers
                .insert(name, String::from_utf8_lossy(&value[start..]).into_owned());
        }

        req.body = Bytes::copy_from_slice(lines.rest);
        req
    }

    /// 按原始大小写查找请求头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// 按 `\n` 切分并去掉行尾的 `\r`
struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Lines<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { rest: buf }
    }

    fn next_line(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        let (mut line, rest) = match self.rest.iter().position(|&b| b == b'\n') {
            Some(pos) => (&self.rest[..pos], &self.rest[pos + 1..]),
            None => (self.rest, &self.rest[self.rest.len()..]),
        };
        self.rest = rest;
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        Some(line)
    }
}

/// 常用状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok = 200,
    Created = 201,
    NoContent = 204,
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn reason(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

pub fn is_http_status_ok(status: u16) -> bool {
    status == StatusCode::Ok.as_u16()
}

/// 本地构造的响应
///
/// 转发路径不会用到它：上游响应原样透传给客户端
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub reason: String,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status_code: status.as_u16(),
            reason: status.reason().to_string(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// 序列化为线上格式，`Content-Length` 总是根据 body 计算
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.reason);
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_get() {
        let raw = b"GET /api/v3/ping HTTP/1.1\r\nHost: x\r\nUser-Agent: ua1\r\n\r\n";
        let req = HttpRequest::parse(raw);

        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/api/v3/ping");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.headers.len(), 2);
        assert_eq!(req.header("Host"), Some("x"));
        assert_eq!(req.header("User-Agent"), Some("ua1"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_skips_line_without_colon() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\ngarbage line\r\nAccept: */*\r\n\r\n";
        let req = HttpRequest::parse(raw);

        assert_eq!(req.headers.len(), 2);
        assert_eq!(req.header("Host"), Some("x"));
        assert_eq!(req.header("Accept"), Some("*/*"));
    }

    #[test]
    fn test_parse_trims_only_leading_whitespace() {
        let raw = b"GET / HTTP/1.1\r\nX-Value: \t a:b \r\nX-Empty:\r\n\r\n";
        let req = HttpRequest::parse(raw);

        assert_eq!(req.header("X-Value"), Some("a:b "));
        assert_eq!(req.header("X-Empty"), Some(""));
    }

    #[test]
    fn test_parse_header_names_are_case_sensitive_last_wins() {
        let raw = b"GET / HTTP/1.1\r\nuser-agent: a\r\nUser-Agent: b\r\nUser-Agent: c\r\n\r\n";
        let req = HttpRequest::parse(raw);

        assert_eq!(req.header("user-agent"), Some("a"));
        assert_eq!(req.header("User-Agent"), Some("c"));
    }

    #[test]
    fn test_parse_keeps_partial_body() {
        let raw = b"POST /order HTTP/1.1\r\nContent-Length: 10\r\n\r\nqty=1";
        let req = HttpRequest::parse(raw);

        assert_eq!(req.method, "POST");
        assert_eq!(req.header("Content-Length"), Some("10"));
        assert_eq!(&req.body[..], b"qty=1");
    }

    #[test]
    fn test_parse_garbage_request_line() {
        let req = HttpRequest::parse(b"\r\n\r\n");
        assert_eq!(req.method, "");
        assert_eq!(req.target, "");
        assert_eq!(req.version, "");
        assert!(req.headers.is_empty());

        let req = HttpRequest::parse(b"BREW\r\n\r\n");
        assert_eq!(req.method, "BREW");
        assert_eq!(req.target, "");
        assert_eq!(req.version, "");

        assert_eq!(HttpRequest::parse(b""), HttpRequest::default());
    }

    #[test]
    fn test_parse_bare_newlines() {
        let req = HttpRequest::parse(b"GET  /a   HTTP/1.0\nHost: y\n\n");
        assert_eq!(req.target, "/a");
        assert_eq!(req.version, "HTTP/1.0");
        assert_eq!(req.header("Host"), Some("y"));
    }

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n"), None);
        assert_eq!(find_header_end(b""), None);
    }

    #[test]
    fn test_response_to_bytes() {
        let resp = HttpResponse::new(StatusCode::NotFound)
            .with_header("Content-Type", "text/plain")
            .with_body("missing");

        assert_eq!(
            resp.to_bytes(),
            b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 7\r\n\r\nmissing"
        );
    }

    #[test]
    fn test_response_default_is_ok() {
        let resp = HttpResponse::default();
        assert_eq!(resp.status_code, 200);
        assert!(is_http_status_ok(resp.status_code));
        assert_eq!(
            resp.to_bytes(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"
        );
        assert!(!is_http_status_ok(StatusCode::NoContent.as_u16()));
    }

    #[test]
    fn test_status_code_display() {
        assert_eq!(StatusCode::BadRequest.to_string(), "400 Bad Request");
    }
}
