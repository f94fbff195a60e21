//! Image output for packed-color and depth buffers.
//!
//! Three sinks, mirroring the render pipeline's needs:
//! - PNG export of the 24-bit packed color buffers both passes produce
//! - EXR export of the float depth map (miss sentinel preserved as written)
//! - optional real-time visualization via TEV (The EXR Viewer)
//!
//! All sinks log failures and return; the renderer's buffers stay valid and
//! a failed save never aborts the pipeline.

use image::{ImageBuffer, Rgb};
use log::{debug, info, warn};
use std::net::TcpStream;
use tev_client::{PacketCreateImage, PacketUpdateImage, TevClient};

/// Split a packed 24-bit color into its 8-bit channels.
#[inline]
fn unpack_rgb(color: u32) -> [u8; 3] {
    [
        ((color >> 16) & 0xFF) as u8,
        ((color >> 8) & 0xFF) as u8,
        (color & 0xFF) as u8,
    ]
}

/// Save a packed-color buffer as an 8-bit PNG.
///
/// The buffer already holds display-ready 8-bit channels (normals mapped to
/// colors), so no tone mapping or gamma correction is applied.
pub fn save_color_png(color: &[u32], width: u32, height: u32, output_path: &str) {
    let image: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb(unpack_rgb(color[(y * width + x) as usize]))
    });

    match image.save(output_path) {
        Ok(_) => info!("image saved as {}", output_path),
        Err(e) => warn!("failed to save image {}: {}", output_path, e),
    }
}

/// Save a depth map as a 32-bit float EXR.
///
/// Depth values are written linearly into all three channels; the +infinity
/// miss sentinel survives the format round trip, so downstream tools can
/// distinguish background from far geometry.
pub fn save_depth_exr(depth: &[f32], width: u32, height: u32, output_path: &str) {
    let result = exr::prelude::write_rgb_file(output_path, width as usize, height as usize, |x, y| {
        let d = depth[y * width as usize + x];
        (d, d, d)
    });

    match result {
        Ok(_) => info!("depth map saved as {}", output_path),
        Err(e) => warn!("failed to save depth map {}: {}", output_path, e),
    }
}

/// Send a packed-color buffer to a TEV instance for live viewing.
///
/// Channels are rescaled to [0,1] floats and reordered from interleaved to
/// planar layout as TEV expects. Connection failures only log a warning.
pub fn send_image_to_tev(color: &[u32], width: u32, height: u32, name: &str, tev_address: &str) {
    // Add default port if not specified
    let tev_address = if tev_address.contains(':') {
        tev_address.to_string()
    } else {
        format!("{}:14158", tev_address)
    };

    debug!("connecting to TEV at {}", tev_address);
    let stream = match TcpStream::connect(&tev_address) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("failed to connect to TEV on {}: {}", tev_address, e);
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("failed to set TCP_NODELAY: {}", e);
    }
    let mut client = TevClient::wrap(stream);

    let create_packet = PacketCreateImage {
        image_name: name,
        width,
        height,
        channel_names: &["R", "G", "B"],
        grab_focus: true,
    };
    if let Err(e) = client.send(create_packet) {
        warn!("failed to create image in TEV: {}", e);
        return;
    }

    // Planar layout: all R values, then all G, then all B.
    let pixel_count = (width * height) as usize;
    let mut rgb_data = Vec::with_capacity(pixel_count * 3);
    for channel in 0..3 {
        for &packed in color {
            rgb_data.push(unpack_rgb(packed)[channel] as f32 / 255.0);
        }
    }

    let start_time = std::time::Instant::now();
    let update_packet = PacketUpdateImage {
        image_name: name,
        grab_focus: false,
        channel_names: &["R", "G", "B"],
        x: 0,
        y: 0,
        width,
        height,
        channel_offsets: &[0, (width * height) as u64, (2 * width * height) as u64],
        channel_strides: &[1, 1, 1],
        data: &rgb_data,
    };
    match client.send(update_packet) {
        Ok(_) => info!("image sent to TEV at {} in {:.2?}", tev_address, start_time.elapsed()),
        Err(e) => warn!("failed to send image data to TEV: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_channels_unpack_in_rgb_order() {
        assert_eq!(unpack_rgb(0x00112233), [0x11, 0x22, 0x33]);
        assert_eq!(unpack_rgb(0), [0, 0, 0]);
    }

    #[test]
    fn png_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let color = vec![0x00FF0000u32, 0x0000FF00, 0x000000FF, 0];
        save_color_png(&color, 2, 2, path.to_str().unwrap());

        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(loaded.get_pixel(1, 0).0, [0, 255, 0]);
        assert_eq!(loaded.get_pixel(0, 1).0, [0, 0, 255]);
        assert_eq!(loaded.get_pixel(1, 1).0, [0, 0, 0]);
    }

    #[test]
    fn exr_depth_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth.exr");
        let depth = vec![1.0f32, 2.0, 3.0, f32::INFINITY];
        save_depth_exr(&depth, 2, 2, path.to_str().unwrap());
        assert!(path.exists());
    }
}
