//! 截图解码

use std::io::Cursor;

use png::{ColorType, Decoder, Transformations};

use crate::IpcError;

/// 读取 PNG 尺寸
pub(crate) fn png_size(bytes: &[u8]) -> Result<(u32, u32), IpcError> {
    let reader = Decoder::new(Cursor::new(bytes)).read_info()?;
    let info = reader.info();
    Ok((info.width, info.height))
}

/// 把 PNG 解码成 BGRA 像素，返回 `(width, height, pixels)`
pub fn png_to_bgra(bytes: &[u8]) -> Result<(u32, u32, Vec<u8>), IpcError> {
    let mut decoder = Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(Transformations::EXPAND | Transformations::STRIP_16);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf)?;
    let data = &buf[..info.buffer_size()];

    let pixels: Vec<u8> = match info.color_type {
        ColorType::Rgba => data
            .chunks_exact(4)
            .flat_map(|p| [p[2], p[1], p[0], p[3]])
            .collect(),
        ColorType::Rgb => data
            .chunks_exact(3)
            .flat_map(|p| [p[2], p[1], p[0], 0xff])
            .collect(),
        ColorType::GrayscaleAlpha => data
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        ColorType::Grayscale => data.iter().flat_map(|g| [*g, *g, *g, 0xff]).collect(),
        ColorType::Indexed => {
            return Err(IpcError::Image("palette was not expanded".to_string()));
        }
    };
    Ok((info.width, info.height, pixels))
}
