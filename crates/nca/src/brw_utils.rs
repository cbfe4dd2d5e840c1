use binrw::BinResult;

#[binrw::parser(reader)]
pub fn read_bool() -> BinResult<bool> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0] != 0)
}

#[binrw::writer(writer)]
pub fn write_bool(value: &bool) -> BinResult<()> {
    writer.write_all(&[u8::from(*value)])?;
    Ok(())
}
