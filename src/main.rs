fn main() {
    sensor_map_pipeline::cli::run();
}
