/// A named benchmark input.
#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    content: &'static [u8],
}

impl TestCase {
    pub const fn new(name: &'static str, group: TestGroup, content: &'static [u8]) -> Self {
        Self { name, group, content }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn content(&self) -> &'static [u8] {
        self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}

pub const GET_SMALL: TestCase = TestCase::new(
    "get_small",
    TestGroup::Small,
    b"GET /index.htm HTTP/1.1\r\nHost: 192.168.4.1\r\n\r\n",
);

pub const GET_BROWSER: TestCase = TestCase::new(
    "get_browser",
    TestGroup::Normal,
    concat!(
        "GET /api/status?verbose=1&fields=heap%2Cuptime HTTP/1.1\r\n",
        "Host: 192.168.4.1\r\n",
        "Connection: keep-alive\r\n",
        "User-Agent: Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36\r\n",
        "Accept: text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8\r\n",
        "Accept-Encoding: gzip, deflate\r\n",
        "Accept-Language: en-US,en;q=0.9\r\n",
        "Cookie: session=6f1c2a9e4b7d; theme=dark\r\n",
        "If-None-Match: \"5f3a9c1e\"\r\n",
        "\r\n",
    )
    .as_bytes(),
);

pub const FORM_POST: TestCase = TestCase::new(
    "form_post",
    TestGroup::Normal,
    concat!(
        "POST /settings HTTP/1.1\r\n",
        "Host: 192.168.4.1\r\n",
        "Content-Type: application/x-www-form-urlencoded\r\n",
        "Content-Length: 70\r\n",
        "\r\n",
        "ssid=home%20network&password=s3cr3t%21&channel=6&hidden=0&dhcp=on&ap=1",
    )
    .as_bytes(),
);

pub const MULTIPART_UPLOAD: TestCase = TestCase::new(
    "multipart_upload",
    TestGroup::Large,
    concat!(
        "POST /update HTTP/1.1\r\n",
        "Host: 192.168.4.1\r\n",
        "Content-Type: multipart/form-data; boundary=----WebKitFormBoundary7MA4YWxk\r\n",
        "Content-Length: 373\r\n",
        "\r\n",
        "------WebKitFormBoundary7MA4YWxk\r\n",
        "Content-Disposition: form-data; name=\"name\"\r\n",
        "\r\n",
        "firmware\r\n",
        "------WebKitFormBoundary7MA4YWxk\r\n",
        "Content-Disposition: form-data; name=\"update\"; filename=\"firmware.bin\"\r\n",
        "Content-Type: application/octet-stream\r\n",
        "\r\n",
        "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        "0123456789abcdef0123456789abcdef\r\n",
        "------WebKitFormBoundary7MA4YWxk--\r\n",
    )
    .as_bytes(),
);

pub fn request_cases() -> Vec<TestCase> {
    vec![GET_SMALL, GET_BROWSER, FORM_POST, MULTIPART_UPLOAD]
}

/// An html page of roughly `size` bytes with a placeholder every few lines.
pub fn template_page(size: usize) -> Vec<u8> {
    const LINE: &[u8] = b"<tr><td>heap</td><td>%HEAP%</td><td>uptime</td><td>%UPTIME%s</td></tr>\n";
    const PLAIN: &[u8] = b"<tr><td colspan=\"4\">100%% static content, nothing to replace</td></tr>\n";

    let mut page = b"<html><body><table>\n".to_vec();
    let mut line = 0;
    while page.len() < size {
        page.extend_from_slice(if line % 4 == 0 { LINE } else { PLAIN });
        line += 1;
    }
    page.extend_from_slice(b"</table></body></html>\n");
    page
}
