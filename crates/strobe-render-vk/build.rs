use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    // Vertex layout: location 0 pos, 1 color, 2 uv (see pipeline::vertex_attributes).
    let vs_src = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inColor;
layout(location = 2) in vec2 inUv;

layout(set = 0, binding = 0) uniform Matrices {
    mat4 world;
    mat4 view;
    mat4 proj;
    mat4 wvp;
} u;

layout(location = 0) out vec3 vColor;
layout(location = 1) out vec2 vUv;

void main() {
    vColor = inColor;
    vUv = inUv;
    gl_Position = u.wvp * vec4(inPos, 1.0);
}
"#;

    let fs_src = r#"
#version 450
layout(set = 0, binding = 1) uniform sampler2D tex;

layout(location = 0) in vec3 vColor;
layout(location = 1) in vec2 vUv;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor * texture(tex, vUv).rgb, 1.0);
}
"#;

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_3 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, name) in [
        (vs_src, shaderc::ShaderKind::Vertex, "scene.vert"),
        (fs_src, shaderc::ShaderKind::Fragment, "scene.frag"),
    ] {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .unwrap_or_else(|e| panic!("writing {name}.spv: {e}"));
    }

    println!("cargo:rerun-if-changed=build.rs");
}
