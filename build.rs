use json::JsonValue;
use std::env;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;

/// Tag tables and the module each one is compiled into.
const NAMESPACES: [(&str, &str); 2] = [("src/tags/ifd.json", "ifd"), ("src/tags/exif.json", "exif")];

fn main() {
    let mut code = String::new();
    for (path, module) in NAMESPACES {
        println!("cargo:rerun-if-changed={path}");
        let contents = fs::read_to_string(path).unwrap_or_else(|e| panic!("reading {path}: {e}"));
        let json = json::parse(&contents).unwrap_or_else(|e| panic!("parsing {path}: {e}"));
        let tags: Vec<TagRecord> = json.members().map(|entry| TagRecord::parse(entry, path)).collect();
        code += &render_namespace(module, path, &tags);
    }

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    fs::write(Path::new(&out_dir).join("ifd_data.rs"), code).expect("writing the tag tables");
}

/// One entry of a tag table.
struct TagRecord {
    name: String,
    tag: u16,
    dtypes: Vec<&'static str>,
    interpretation: String,
    count: String,
    description: String,
    doc: String,
}

impl TagRecord {
    fn parse(entry: &JsonValue, path: &str) -> Self {
        let text = |key: &str| -> String {
            entry[key]
                .as_str()
                .unwrap_or_else(|| panic!("{path}: entry without a string {key:?}: {entry}"))
                .to_string()
        };
        let name = text("name");
        let tag_text = text("tag");
        let tag = tag_text
            .strip_prefix("0x")
            .and_then(|hex| u16::from_str_radix(hex, 16).ok())
            .unwrap_or_else(|| panic!("{path}: {name} has tag {tag_text:?}"));
        let dtypes = entry["dtype"]
            .members()
            .map(|dtype| value_type(dtype.as_str().unwrap_or_default(), &name))
            .collect();
        let count = match text("count").parse::<u32>() {
            Ok(n) => format!("IfdCount::ConcreteValue({n})"),
            Err(_) => "IfdCount::N".to_string(),
        };

        let mut doc = String::new();
        for line in text("description").lines().chain(text("long_description").lines()) {
            let _ = writeln!(doc, "/// {line}");
        }
        let references = text("references");
        if !references.is_empty() {
            let _ = writeln!(doc, "///\n/// References: {references}");
        }

        Self {
            interpretation: interpretation(&entry["interpretation"], &name),
            description: text("description"),
            name,
            tag,
            dtypes,
            count,
            doc,
        }
    }

    fn render(&self) -> String {
        let dtypes: String = self.dtypes.iter().map(|t| format!("IfdValueType::{t}, ")).collect();
        format!(
            "{doc}pub const {name}: IfdFieldDescriptor = IfdFieldDescriptor {{
                name: {name:?},
                tag: {tag:#06X},
                dtype: &[{dtypes}],
                interpretation: {interpretation},
                count: {count},
                description: {description:?},
            }};\n",
            doc = self.doc,
            name = self.name,
            tag = self.tag,
            interpretation = self.interpretation,
            count = self.count,
            description = self.description,
        )
    }
}

fn render_namespace(module: &str, path: &str, tags: &[TagRecord]) -> String {
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    let definitions: String = tags.iter().map(TagRecord::render).collect();
    format!(
        "
        /// Tags known in the {module} namespace, generated from `{path}`
        #[allow(non_upper_case_globals)]
        pub mod {module} {{
            #[allow(unused_imports)]
            use super::{{IfdFieldDescriptor, IfdValueType, IfdCount, IfdTypeInterpretation, IfdType}};
            pub(crate) const ALL: [IfdFieldDescriptor; {len}] = [{all}];
            {definitions}
        }}
        ",
        len = tags.len(),
        all = names.join(", "),
    )
}

fn value_type(dtype: &str, tag: &str) -> &'static str {
    match dtype {
        "BYTE" => "Byte",
        "ASCII" => "Ascii",
        "SHORT" => "Short",
        "LONG" => "Long",
        "RATIONAL" => "Rational",
        "SBYTE" => "SignedByte",
        "UNDEFINED" => "Undefined",
        "SSHORT" => "SignedShort",
        "SLONG" => "SignedLong",
        "SRATIONAL" => "SignedRational",
        "FLOAT" => "Float",
        "DOUBLE" => "Double",
        "IFD" => "Ifd",
        "LONG8" => "Long8",
        "SLONG8" => "SignedLong8",
        "IFD8" => "Ifd8",
        other => panic!("{tag}: unknown dtype {other:?}"),
    }
}

fn interpretation(json: &JsonValue, tag: &str) -> String {
    // `values` maps a display name to the stored value, or to "bit N" for flags
    let values = || -> String {
        let pairs: String = json["values"]
            .entries()
            .map(|(label, value)| {
                let value = value.as_str().unwrap_or_default().trim_start_matches("bit ");
                format!("({value}, {label:?}), ")
            })
            .collect();
        format!("&[{pairs}]")
    };
    match json["kind"].as_str().unwrap_or("DEFAULT") {
        "ENUMERATED" => format!("IfdTypeInterpretation::Enumerated {{ values: {} }}", values()),
        "BITFLAGS" => format!("IfdTypeInterpretation::Bitflags {{ values: {} }}", values()),
        "CFAPATTERN" => "IfdTypeInterpretation::CfaPattern".to_string(),
        "IFDOFFSET" => {
            let ifd_type = match json["ifd_type"].as_str() {
                Some("IFD") => "IfdType::Ifd",
                Some("EXIF") => "IfdType::Exif",
                other => panic!("{tag}: unknown ifd_type {other:?}"),
            };
            format!("IfdTypeInterpretation::IfdOffset {{ ifd_type: {ifd_type} }}")
        }
        "OFFSETS" => match json["lengths"].as_str() {
            Some(lengths) => format!("IfdTypeInterpretation::Offsets {{ lengths: &{lengths} }}"),
            None => panic!("{tag}: offsets without a lengths tag"),
        },
        "LENGTHS" => "IfdTypeInterpretation::Lengths".to_string(),
        "BLOB" => "IfdTypeInterpretation::Blob".to_string(),
        "DEFAULT" => "IfdTypeInterpretation::Default".to_string(),
        other => panic!("{tag}: unknown interpretation {other:?}"),
    }
}
