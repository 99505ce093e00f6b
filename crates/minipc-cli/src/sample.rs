//! The functions exported by `minipc serve`.

use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ByteOrder};
use minipc_core::{Descriptor, HandlerError, Link, Prototype, TypeTag, Value, ident};

/// `sum(int32, int32) -> int32`, wrapping on overflow.
pub fn sum_prototype() -> Prototype {
    Prototype::new(ident(b"sum"), [TypeTag::Int32, TypeTag::Int32], TypeTag::Int32)
}

/// `gettimeofday() -> struct[12]`: seconds then microseconds, big-endian.
pub fn tod_prototype() -> Prototype {
    Prototype::new(ident(b"tod"), Vec::new(), TypeTag::Struct { size: TIMEVAL_SIZE })
}

const TIMEVAL_SIZE: usize = 12;

/// Clock before the epoch.
const CLOCK_ERROR: i32 = 1;

fn sum(args: &[Value]) -> Result<Value, HandlerError> {
    match args {
        [Value::Int32(a), Value::Int32(b)] => Ok(Value::Int32(a.wrapping_add(*b))),
        _ => Err(HandlerError::new(HandlerError::RETURN_MISMATCH)),
    }
}

fn gettimeofday(_: &[Value]) -> Result<Value, HandlerError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| HandlerError::new(CLOCK_ERROR))?;
    Ok(Value::Struct(encode_timeval(now.as_secs() as i64, now.subsec_micros())))
}

pub fn encode_timeval(secs: i64, micros: u32) -> Vec<u8> {
    let mut buf = vec![0u8; TIMEVAL_SIZE];
    BigEndian::write_i64(&mut buf[..8], secs);
    BigEndian::write_u32(&mut buf[8..], micros);
    buf
}

/// `(seconds, microseconds)`, or `None` if the struct has the wrong size.
pub fn decode_timeval(bytes: &[u8]) -> Option<(i64, u32)> {
    (bytes.len() == TIMEVAL_SIZE)
        .then(|| (BigEndian::read_i64(&bytes[..8]), BigEndian::read_u32(&bytes[8..])))
}

/// Export `sum` and `gettimeofday` on a server link.
pub fn export_all(server: &mut Link) -> Result<(), minipc_core::Error> {
    server.export("sum", Descriptor::new(sum_prototype(), sum))?;
    server.export("gettimeofday", Descriptor::new(tod_prototype(), gettimeofday))?;
    Ok(())
}
