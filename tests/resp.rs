use evkv::*;

#[test]
fn parse_ping_and_set_get() {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"*1\r\n$4\r\nPING\r\n");
    buf.extend_from_slice(b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n");
    buf.extend_from_slice(b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n");

    let mut rr = RespReader::new(ByteCursor::new(&buf));
    let mut cmds = Vec::new();
    loop {
        match read_command(&mut rr) {
            Ok(cmd) => cmds.push(cmd),
            Err(e) if e.is_incomplete() => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(cmds.len(), 3);
    assert!(matches!(cmds[0], Command::Ping));
    assert!(matches!(cmds[1], Command::Set { ttl: None, .. }));
    assert!(matches!(cmds[2], Command::Get(_)));
    assert_eq!(rr.get_ref().remaining(), 0);
}

#[test]
fn echo_roundtrips_printable_ascii() {
    let printable: String = (b' '..=b'~').map(char::from).collect();
    for msg in ["", "Hello", "with space", printable.as_str()] {
        let wire = encode_request(&["ECHO", msg]);
        let mut rr = RespReader::new(ByteCursor::new(wire.as_bytes()));
        assert_eq!(read_command(&mut rr), Ok(Command::Echo(msg.to_string())));
    }
}

#[test]
fn malformed_frames_are_rejected() {
    let cases: [(&[u8], ProtocolError); 5] = [
        (b"*abc\r\n", ProtocolError::InvalidInteger("abc".into())),
        (
            b"*1\r\n$x\r\nPING\r\n",
            ProtocolError::InvalidInteger("x".into()),
        ),
        (
            b"*1\r\n$5\r\nPING\r\n",
            ProtocolError::LengthMismatch {
                declared: 5,
                actual: 4,
            },
        ),
        (
            b"*2\r\n$4\r\nECHO\r\n$2\r\nHello\r\n",
            ProtocolError::PayloadOverrun { declared: 2 },
        ),
        (b"#1\r\n", ProtocolError::UnknownType('#')),
    ];
    for (wire, expected) in cases {
        let mut rr = RespReader::new(ByteCursor::new(wire));
        assert_eq!(read_command(&mut rr), Err(expected));
    }
}

#[test]
fn generic_lines() {
    assert_eq!(parse_line(":7"), Ok(Line::Integer(7)));
    assert_eq!(parse_line("+PONG"), Ok(Line::Simple("PONG".into())));
    assert_eq!(parse_line("$-1"), Ok(Line::BulkLen(-1)));
}
