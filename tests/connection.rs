//! Connection facade tests against an in-process scripted server.
//!
//! The server speaks just enough of the v3 protocol to drive the facade:
//! simple queries echo their SQL back as a one-row result, Bind remembers
//! its parameter values and Execute echoes them, and the transaction
//! brackets answer with their tags.

mod support;

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use turnstile_postgres::{Connection, Error, Opts};

fn cstr(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

fn parse_bind_values(payload: &[u8]) -> Vec<String> {
    fn skip_cstr(data: &[u8]) -> &[u8] {
        let pos = data.iter().position(|&b| b == 0).expect("NUL terminator");
        &data[pos + 1..]
    }

    let mut data = skip_cstr(skip_cstr(payload)); // portal, statement
    let n_formats = u16::from_be_bytes([data[0], data[1]]) as usize;
    data = &data[2 + 2 * n_formats..];
    let n_values = u16::from_be_bytes([data[0], data[1]]) as usize;
    data = &data[2..];

    let mut values = Vec::with_capacity(n_values);
    for _ in 0..n_values {
        let len = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        data = &data[4..];
        if len < 0 {
            values.push("NULL".to_string());
        } else {
            let len = len as usize;
            values.push(String::from_utf8_lossy(&data[..len]).into_owned());
            data = &data[len..];
        }
    }
    values
}

async fn serve(mut sock: TcpStream) {
    // Startup message: length-prefixed, no type byte.
    let mut len = [0u8; 4];
    sock.read_exact(&mut len).await.unwrap();
    let n = u32::from_be_bytes(len) as usize - 4;
    let mut payload = vec![0u8; n];
    sock.read_exact(&mut payload).await.unwrap();

    let mut out = support::auth_ok();
    out.extend(support::handshake_tail());
    sock.write_all(&out).await.unwrap();

    let mut bound: Vec<String> = Vec::new();
    loop {
        let mut type_byte = [0u8; 1];
        if sock.read_exact(&mut type_byte).await.is_err() {
            return;
        }
        sock.read_exact(&mut len).await.unwrap();
        let n = u32::from_be_bytes(len) as usize - 4;
        let mut payload = vec![0u8; n];
        sock.read_exact(&mut payload).await.unwrap();

        let mut out = Vec::new();
        match type_byte[0] {
            b'Q' => {
                let sql = cstr(&payload);
                match sql.as_str() {
                    "BEGIN" | "COMMIT" | "ROLLBACK" => {
                        out.extend(support::command_complete(&sql));
                        out.extend(support::ready(if sql == "BEGIN" { b'T' } else { b'I' }));
                    }
                    _ => {
                        out.extend(support::row_description(&["echo"]));
                        out.extend(support::data_row(&[Some(sql.as_str())]));
                        out.extend(support::command_complete("SELECT 1"));
                        out.extend(support::ready(b'I'));
                    }
                }
            }
            b'P' => out.extend(support::parse_complete()),
            b'D' => {
                if payload[0] == b'S' {
                    out.extend(support::parameter_description(&[23, 1043]));
                }
                out.extend(support::row_description(&["echo"]));
            }
            b'B' => {
                bound = parse_bind_values(&payload);
                out.extend(support::bind_complete());
            }
            b'E' => {
                let echoed = bound.join(",");
                out.extend(support::data_row(&[Some(echoed.as_str())]));
                out.extend(support::command_complete("SELECT 1"));
            }
            b'C' => out.extend(support::close_complete()),
            b'H' => {}
            b'S' => out.extend(support::ready(b'I')),
            b'X' => return,
            other => panic!("unexpected frontend message: {}", other as char),
        }
        if !out.is_empty() {
            sock.write_all(&out).await.unwrap();
        }
    }
}

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        serve(sock).await;
    });
    addr
}

async fn connect(addr: SocketAddr) -> Connection {
    let opts = Opts {
        host: addr.ip().to_string(),
        port: addr.port(),
        user: "tester".into(),
        database: Some("testdb".into()),
        ..Opts::default()
    };
    Connection::connect(opts).await.unwrap()
}

#[tokio::test]
async fn simple_query_over_a_socket() {
    let addr = spawn_server().await;
    let conn = connect(addr).await;

    let key = conn.backend_key().unwrap();
    assert_eq!((key.pid, key.secret), (1234, 12345678));
    assert_eq!(
        conn.server_params().get("client_encoding").map(String::as_str),
        Some("UTF8")
    );

    let group = conn.execute("SELECT 'hello'").await.unwrap();
    assert_eq!(group.get(0).unwrap().text(0, 0), Some("SELECT 'hello'"));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn interleaved_submissions_complete_in_order() {
    let addr = spawn_server().await;
    let conn = connect(addr).await;

    let (a, b, c) = tokio::join!(
        conn.execute("SELECT 1"),
        conn.execute("SELECT 2"),
        conn.execute("SELECT 3"),
    );

    // Each completion carries its own query's result even though the wire
    // has no correlation ids.
    assert_eq!(a.unwrap().get(0).unwrap().text(0, 0), Some("SELECT 1"));
    assert_eq!(b.unwrap().get(0).unwrap().text(0, 0), Some("SELECT 2"));
    assert_eq!(c.unwrap().get(0).unwrap().text(0, 0), Some("SELECT 3"));
}

#[tokio::test]
async fn prepared_statement_round_trip() {
    let addr = spawn_server().await;
    let conn = connect(addr).await;

    let mut stmt = conn.prepare("SELECT $1::int, $2::varchar(30)").await.unwrap();
    assert_eq!(stmt.parameter_oids(), &[23, 1043]);
    assert_eq!(stmt.columns()[0].name, "echo");

    let result = stmt.execute((12345, "This is a test")).await.unwrap();
    assert_eq!(result.text(0, 0), Some("12345,This is a test"));
    assert_eq!(result.columns[0].name, "echo");

    // Re-execution closes the stale portal and binds a fresh one.
    let result = stmt.execute((7, "x")).await.unwrap();
    assert_eq!(result.text(0, 0), Some("7,x"));

    let result = stmt.execute((None::<i32>, "y")).await.unwrap();
    assert_eq!(result.text(0, 0), Some("NULL,y"));

    stmt.close().await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn transaction_commits_and_returns_the_block_value() {
    let addr = spawn_server().await;
    let conn = connect(addr).await;

    let value = conn
        .transaction(|tx| async move {
            let group = tx.execute("INSERT INTO t VALUES (1)").await?;
            assert_eq!(
                group.get(0).unwrap().text(0, 0),
                Some("INSERT INTO t VALUES (1)")
            );
            Ok(42)
        })
        .await
        .unwrap();
    assert_eq!(value, 42);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn transaction_rolls_back_on_block_failure() {
    let addr = spawn_server().await;
    let conn = connect(addr).await;

    let err = conn
        .transaction(|tx| async move {
            tx.execute("INSERT INTO t VALUES (1)").await?;
            Err::<(), _>(Error::InvalidUsage("abort the block".into()))
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("abort the block"));

    // The rollback went through and the connection still works.
    let group = conn.execute("SELECT 1").await.unwrap();
    assert_eq!(group.get(0).unwrap().text(0, 0), Some("SELECT 1"));

    conn.close().await.unwrap();
}
