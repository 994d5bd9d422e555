use crate::assembler::{Samples, StripTileAssembler};
use crate::byte_order_rw::{ByteOrderReader, Endian};
use crate::descriptor::{ImageDescriptor, SubfileKind};
use crate::error::{DngError, Result};
use crate::ifd::{Ifd, IfdEntry, IfdPath};
use crate::ifd_reader::IfdReader;
use crate::FileType;
use derivative::Derivative;
use std::fmt::{Display, Formatter};
use std::path::Path;
use tracing::{debug, warn};

/// Knobs for [DngLoader].
#[derive(Debug, Clone, Derivative)]
#[derivative(Default)]
pub struct LoadOptions {
    /// Tags whose entries are copied verbatim into [DecodedImage::custom_fields].
    pub custom_fields: Vec<u16>,
    /// How deep sub-IFD pointers may nest.
    #[derivative(Default(value = "16"))]
    pub max_ifd_depth: usize,
    /// Images whose decoded samples would take more bytes than this are skipped.
    #[derivative(Default(value = "1 << 30"))]
    pub max_image_bytes: usize,
}

/// Progress of a [DngLoader]. `Failed` is terminal and carries the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderState {
    Init,
    HeaderValidated,
    IfdsDiscovered,
    ImagesAssembled,
    Done,
    Failed(String),
}

/// One image of the file with its samples.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub descriptor: ImageDescriptor,
    pub samples: Samples,
    pub custom_fields: Vec<IfdEntry>,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    pub fn bits_per_sample(&self) -> &[u16] {
        &self.descriptor.bits_per_sample
    }

    pub fn samples_per_pixel(&self) -> u16 {
        self.descriptor.samples_per_pixel
    }

    pub fn cfa_pattern(&self) -> Option<&[u8]> {
        self.descriptor.metadata.cfa_pattern.as_deref()
    }

    pub fn black_level(&self) -> &[f64] {
        &self.descriptor.black_level
    }

    pub fn white_level(&self) -> &[f64] {
        &self.descriptor.white_level
    }

    pub fn orientation(&self) -> u16 {
        self.descriptor.orientation
    }
}

/// An image that was found but could not be decoded.
#[derive(Debug)]
pub struct Diagnostic {
    pub path: IfdPath,
    pub error: DngError,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.error)
    }
}

#[derive(Debug)]
pub struct LoadResult {
    pub file_type: FileType,
    pub endian: Endian,
    /// The top-level IFD chain with everything nested below it.
    pub ifds: Vec<Ifd>,
    /// Decoded images in discovery order.
    pub images: Vec<DecodedImage>,
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadResult {
    /// The first full resolution image, which is the raw image in a regular DNG.
    pub fn main_image(&self) -> Option<&DecodedImage> {
        self.images
            .iter()
            .find(|image| image.descriptor.subfile_kind == SubfileKind::Main)
    }
}

struct Header {
    endian: Endian,
    file_type: FileType,
    first_ifd_offset: u32,
}

/// Decodes a complete DNG file held in memory.
///
/// Header and directory errors fail the whole load. Errors while decoding a single image
/// only drop that image; they end up in [LoadResult::diagnostics].
pub struct DngLoader<'a> {
    data: &'a [u8],
    options: LoadOptions,
    state: LoaderState,
}

impl<'a> DngLoader<'a> {
    pub fn new(data: &'a [u8], options: LoadOptions) -> Self {
        Self {
            data,
            options,
            state: LoaderState::Init,
        }
    }

    pub fn state(&self) -> &LoaderState {
        &self.state
    }

    pub fn load(&mut self) -> Result<LoadResult> {
        match self.run() {
            Ok(result) => Ok(result),
            Err(e) => {
                self.state = LoaderState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn run(&mut self) -> Result<LoadResult> {
        let header = self.read_header()?;
        self.state = LoaderState::HeaderValidated;
        let reader = ByteOrderReader::new(self.data, header.endian);

        let ifds = IfdReader::new(reader, self.options.max_ifd_depth)
            .read_chain(header.first_ifd_offset)?;
        self.state = LoaderState::IfdsDiscovered;
        debug!("found {} top-level IFDs", ifds.len());

        let (images, diagnostics) = self.assemble_images(reader, &ifds);
        self.state = LoaderState::ImagesAssembled;

        let result = LoadResult {
            file_type: header.file_type,
            endian: header.endian,
            ifds,
            images,
            diagnostics,
        };
        self.state = LoaderState::Done;
        Ok(result)
    }

    fn read_header(&self) -> Result<Header> {
        if self.data.len() < 8 {
            return Err(DngError::InvalidHeader(format!(
                "file is only {} bytes long",
                self.data.len()
            )));
        }
        let endian = Endian::from_marker([self.data[0], self.data[1]]).ok_or_else(|| {
            DngError::InvalidHeader(format!(
                "invalid byte order marker {:02X?}",
                &self.data[..2]
            ))
        })?;
        let reader = ByteOrderReader::new(self.data, endian);
        let magic = reader.read_u16(2)?;
        let file_type = FileType::from_magic(magic).ok_or_else(|| {
            DngError::InvalidHeader(format!("invalid magic number (expected 42, got {magic})"))
        })?;
        let first_ifd_offset = reader.read_u32(4)?;
        if first_ifd_offset < 8 || first_ifd_offset as usize >= self.data.len() {
            return Err(DngError::InvalidHeader(format!(
                "first IFD offset {first_ifd_offset} is outside of the file"
            )));
        }
        Ok(Header {
            endian,
            file_type,
            first_ifd_offset,
        })
    }

    fn assemble_images(
        &self,
        reader: ByteOrderReader<'a>,
        ifds: &[Ifd],
    ) -> (Vec<DecodedImage>, Vec<Diagnostic>) {
        let mut images = Vec::new();
        let mut diagnostics = Vec::new();
        let Some(root) = ifds.first() else {
            return (images, diagnostics);
        };
        let image_ifds = ifds
            .iter()
            .flat_map(|top| top.post_order())
            .filter(|dir| ImageDescriptor::is_image_bearing(dir));
        for dir in image_ifds {
            match self.decode_image(reader, dir, root) {
                Ok(image) => {
                    debug!(
                        "decoded {} ({}x{})",
                        dir.path,
                        image.width(),
                        image.height()
                    );
                    images.push(image)
                }
                Err(error) => {
                    warn!("skipping the image at {}: {error}", dir.path);
                    diagnostics.push(Diagnostic {
                        path: dir.path.clone(),
                        error,
                    });
                }
            }
        }
        (images, diagnostics)
    }

    fn decode_image(&self, reader: ByteOrderReader, dir: &Ifd, root: &Ifd) -> Result<DecodedImage> {
        let descriptor = ImageDescriptor::from_ifd(dir, root)?;
        let samples =
            StripTileAssembler::new(reader, &descriptor).assemble(self.options.max_image_bytes)?;
        let custom_fields = self
            .options
            .custom_fields
            .iter()
            .filter_map(|tag| dir.get_by_number(*tag).cloned())
            .collect();
        Ok(DecodedImage {
            descriptor,
            samples,
            custom_fields,
        })
    }
}

pub fn load_dng(data: &[u8]) -> Result<LoadResult> {
    load_dng_with_options(data, &LoadOptions::default())
}

pub fn load_dng_with_options(data: &[u8], options: &LoadOptions) -> Result<LoadResult> {
    DngLoader::new(data, options.clone()).load()
}

/// Reads the whole file into memory and decodes it.
pub fn load_dng_file(path: impl AsRef<Path>) -> Result<LoadResult> {
    let data = std::fs::read(path)?;
    load_dng(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompress::{deflate, ljpeg, lzw};
    use crate::ifd::IfdValue;
    use crate::tags::ifd;
    use crate::testutil::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const RAW: [u16; 12] = [
        100, 4095, 0, 2048, //
        1, 2, 3, 4, //
        4000, 300, 20, 7,
    ];

    fn camera_root(children: Vec<Ifd>) -> Ifd {
        with_sub_ifds(
            empty_ifd()
                .with(
                    ifd::DNGVersion,
                    IfdValue::List(vec![
                        IfdValue::Byte(1),
                        IfdValue::Byte(4),
                        IfdValue::Byte(0),
                        IfdValue::Byte(0),
                    ]),
                )
                .with(ifd::UniqueCameraModel, IfdValue::Ascii("Fixture Cam".into())),
            children,
        )
    }

    fn sixteen_bit_raw(endian: Endian) -> Ifd {
        strip_image(
            4,
            3,
            16,
            1,
            1,
            2,
            vec![pack_u16(&RAW[..8], endian), pack_u16(&RAW[8..], endian)],
        )
        .with(ifd::NewSubfileType, IfdValue::Long(0))
        .with(ifd::CFARepeatPatternDim, IfdValue::List(vec![IfdValue::Short(2); 2]))
        .with(
            ifd::CFAPattern,
            IfdValue::List(vec![
                IfdValue::Byte(0),
                IfdValue::Byte(1),
                IfdValue::Byte(1),
                IfdValue::Byte(2),
            ]),
        )
        .with(ifd::WhiteLevel, IfdValue::Long(4095))
    }

    fn thumbnail() -> Ifd {
        strip_image(2, 2, 8, 3, 1, 2, vec![(0..12).collect()])
            .with(ifd::NewSubfileType, IfdValue::Long(1))
    }

    fn preview() -> Ifd {
        strip_image(3, 1, 12, 1, 1, 1, vec![pack_u12(&[0xABC, 0x123, 0xFFF])])
            .with(ifd::NewSubfileType, IfdValue::Long(1))
    }

    fn three_images(endian: Endian) -> Vec<u8> {
        write(
            endian,
            vec![camera_root(vec![sixteen_bit_raw(endian), thumbnail(), preview()])],
        )
    }

    #[test]
    fn little_and_big_endian_decode_identically() {
        let le = load_dng(&three_images(Endian::Little)).unwrap();
        let be = load_dng(&three_images(Endian::Big)).unwrap();
        assert_eq!(le.endian, Endian::Little);
        assert_eq!(be.endian, Endian::Big);
        assert_eq!(le.images.len(), 3);
        for (a, b) in le.images.iter().zip(&be.images) {
            assert_eq!(a.samples, b.samples);
            assert_eq!(a.descriptor, b.descriptor);
        }
        assert_eq!(le.images[0].samples, Samples::U16(RAW.to_vec()));
    }

    #[test]
    fn three_sub_ifds_in_discovery_order() {
        let result = load_dng(&three_images(Endian::Little)).unwrap();
        assert!(result.diagnostics.is_empty());
        let sizes: Vec<_> = result
            .images
            .iter()
            .map(|image| (image.width(), image.height(), image.samples_per_pixel()))
            .collect();
        assert_eq!(sizes, vec![(4, 3, 1), (2, 2, 3), (3, 1, 1)]);
        assert_eq!(result.images[1].samples, Samples::U8((0..12).collect()));
        assert_eq!(result.images[2].samples, Samples::U16(vec![0xABC, 0x123, 0xFFF]));

        let raw = result.main_image().unwrap();
        assert_eq!(raw.cfa_pattern(), Some(&[0, 1, 1, 2][..]));
        assert_eq!(raw.white_level(), &[4095.0]);
        assert_eq!(raw.black_level(), &[0.0]);
        assert_eq!(raw.orientation(), 1);
        // camera level tags come from IFD0
        assert_eq!(raw.descriptor.metadata.dng_version, Some([1, 4, 0, 0]));
        assert_eq!(
            raw.descriptor.metadata.unique_camera_model.as_deref(),
            Some("Fixture Cam")
        );
        assert_eq!(result.images[1].white_level(), &[255.0; 3]);
    }

    #[test]
    fn decoding_is_idempotent() {
        let bytes = three_images(Endian::Big);
        let first = load_dng(&bytes).unwrap();
        let second = load_dng(&bytes).unwrap();
        assert_eq!(first.images.len(), second.images.len());
        for (a, b) in first.images.iter().zip(&second.images) {
            assert_eq!(a.samples, b.samples);
            assert_eq!(a.descriptor, b.descriptor);
        }
    }

    #[test]
    fn self_referential_chain_fails_in_bounded_time() {
        // IFD0 at 8 with a single ImageWidth entry whose next pointer is 8 again
        let mut bytes = vec![0x49, 0x49, 42, 0, 8, 0, 0, 0];
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&[0x00, 0x01, 3, 0, 1, 0, 0, 0, 16, 0, 0, 0]);
        bytes.extend_from_slice(&[8, 0, 0, 0]);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(load_dng(&bytes).map(|result| result.images.len()));
        });
        let result = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("decoding a cyclic chain did not terminate");
        assert!(matches!(result, Err(DngError::MalformedChain(_))));
    }

    #[test]
    fn bad_strip_offset_only_drops_that_image() {
        for endian in [Endian::Little, Endian::Big] {
            let broken = empty_ifd()
                .with(ifd::ImageWidth, IfdValue::Long(2))
                .with(ifd::ImageLength, IfdValue::Long(2))
                .with(ifd::BitsPerSample, IfdValue::Short(8))
                .with(ifd::StripOffsets, IfdValue::Long(1_000_000))
                .with(ifd::StripByteCounts, IfdValue::Long(4));
            let bytes = write(endian, vec![camera_root(vec![broken, thumbnail()])]);
            let result = load_dng(&bytes).unwrap();
            assert_eq!(result.images.len(), 1);
            assert_eq!(result.images[0].width(), 2);
            assert_eq!(result.images[0].samples_per_pixel(), 3);
            assert_eq!(result.diagnostics.len(), 1);
            assert!(matches!(
                result.diagnostics[0].error,
                DngError::TruncatedData {
                    offset: 1_000_000,
                    ..
                }
            ));
            assert_eq!(result.diagnostics[0].path.to_string(), "IFD0.SubIFDs.0");
        }
    }

    #[test]
    fn unsupported_and_incomplete_images_are_reported() {
        let lossy = strip_image(2, 1, 8, 1, 34892, 1, vec![vec![0xFF, 0xD8]]);
        let no_height = empty_ifd().with(ifd::ImageWidth, IfdValue::Long(2));
        let bytes = write(
            Endian::Little,
            vec![camera_root(vec![lossy, thumbnail(), no_height])],
        );
        let result = load_dng(&bytes).unwrap();
        assert_eq!(result.images.len(), 1);
        assert!(matches!(
            result.diagnostics[0].error,
            DngError::UnsupportedCompression { code: 34892, .. }
        ));
        assert!(matches!(
            result.diagnostics[1].error,
            DngError::MissingRequiredTag("ImageLength")
        ));
    }

    #[test]
    fn oversized_blocks_only_drop_their_image() {
        let huge_tiles = tile_image(
            1,
            1,
            16,
            1,
            5,
            1 << 31,
            1 << 31,
            vec![lzw::tests::encode(&[0, 0], true)],
        );
        let mut stream = ljpeg::tests::encode(&[7], 1, 1, 1, 12, 1, 0);
        let sof = stream.windows(2).position(|w| w == [0xFF, 0xC3]).unwrap();
        // 65535x65535 pixels
        stream[sof + 5..sof + 9].copy_from_slice(&[0xFF; 4]);
        let huge_frame = tile_image(1, 1, 12, 1, 7, 1, 1, vec![stream]);

        let bytes = write(
            Endian::Little,
            vec![camera_root(vec![huge_tiles, huge_frame, thumbnail()])],
        );
        let result = load_dng(&bytes).unwrap();
        assert_eq!(result.images.len(), 1);
        assert_eq!(result.images[0].samples, Samples::U8((0..12).collect()));
        assert_eq!(result.diagnostics.len(), 2);
        assert!(matches!(
            result.diagnostics[0].error,
            DngError::InvalidGeometry(_)
        ));
        assert!(matches!(
            result.diagnostics[1].error,
            DngError::CorruptStream(_)
        ));
    }

    #[test]
    fn compressed_strips() {
        let samples: Vec<u16> = (0..64u16).map(|i| (i * 37) % 4096).collect();
        for endian in [Endian::Little, Endian::Big] {
            let bytes = pack_u16(&samples, endian);
            let lzw_image = strip_image(8, 8, 16, 1, 5, 4, vec![
                lzw::tests::encode(&bytes[..64], true),
                lzw::tests::encode(&bytes[64..], true),
            ]);
            let deflate_image = strip_image(8, 8, 16, 1, 8, 8, vec![
                miniz_oxide::deflate::compress_to_vec_zlib(&bytes, 6),
            ]);
            let file = write(endian, vec![camera_root(vec![lzw_image, deflate_image])]);
            let result = load_dng(&file).unwrap();
            assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
            for image in &result.images {
                assert_eq!(image.samples, Samples::U16(samples.clone()));
            }
        }
    }

    #[test]
    fn deflate_module_is_used_for_code_8() {
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&[1, 2, 3], 6);
        assert_eq!(deflate::decode(&compressed, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn lossless_jpeg_tiles_with_packed_components() {
        // 6x2 image in 4x2 tiles; each tile is a 2x2 frame with two components
        let expected: Vec<u16> = (0..12).map(|i| 1000 + i * 250).collect();
        let image = &expected;
        let tile = |x0: usize| -> Vec<u16> {
            (0..2)
                .flat_map(|row| {
                    (x0..x0 + 4).map(move |col| if col < 6 { image[row * 6 + col] } else { 0 })
                })
                .collect()
        };
        let tiles = vec![
            ljpeg::tests::encode(&tile(0), 2, 2, 2, 14, 1, 0),
            ljpeg::tests::encode(&tile(4), 2, 2, 2, 14, 6, 0),
        ];
        let raw = tile_image(6, 2, 14, 1, 7, 4, 2, tiles);
        let bytes = write(Endian::Big, vec![camera_root(vec![raw])]);
        let result = load_dng(&bytes).unwrap();
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert_eq!(result.images[0].samples, Samples::U16(expected));
    }

    #[test]
    fn custom_fields_are_copied() {
        let raw = sixteen_bit_raw(Endian::Little)
            .with(ifd::Make, IfdValue::Ascii("Maker".into()));
        let bytes = write(Endian::Little, vec![camera_root(vec![raw])]);
        let options = LoadOptions {
            custom_fields: vec![ifd::Make.tag, 0xBEEF],
            ..Default::default()
        };
        let result = load_dng_with_options(&bytes, &options).unwrap();
        let fields = &result.images[0].custom_fields;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].value.as_str(), Some("Maker"));
    }

    #[test]
    fn image_size_limit_drops_the_image() {
        let bytes = three_images(Endian::Little);
        let options = LoadOptions {
            max_image_bytes: 12,
            ..Default::default()
        };
        let result = load_dng_with_options(&bytes, &options).unwrap();
        // the 4x3 16 bit raw image needs 24 bytes
        assert_eq!(result.images.len(), 2);
        assert!(matches!(
            result.diagnostics[0].error,
            DngError::InvalidGeometry(_)
        ));
    }

    #[test]
    fn header_errors_are_fatal() {
        let valid = three_images(Endian::Little);

        let mut bad_marker = valid.clone();
        bad_marker[0] = b'X';
        let mut bad_magic = valid.clone();
        bad_magic[2] = 43;
        let mut bad_offset = valid.clone();
        bad_offset[4..8].copy_from_slice(&u32::MAX.to_le_bytes());

        for bytes in [bad_marker, bad_magic, bad_offset, vec![0x49, 0x49, 42]] {
            let mut loader = DngLoader::new(&bytes, LoadOptions::default());
            assert!(matches!(loader.load(), Err(DngError::InvalidHeader(_))));
            assert!(matches!(loader.state(), LoaderState::Failed(_)));
        }
    }

    #[test]
    fn state_machine_reaches_done() {
        let bytes = three_images(Endian::Little);
        let mut loader = DngLoader::new(&bytes, LoadOptions::default());
        assert_eq!(loader.state(), &LoaderState::Init);
        let result = loader.load().unwrap();
        assert_eq!(loader.state(), &LoaderState::Done);
        assert_eq!(result.file_type, FileType::Dng);
        assert_eq!(result.ifds.len(), 1);
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            load_dng_file("/nonexistent/image.dng"),
            Err(DngError::Io(_))
        ));
    }
}
